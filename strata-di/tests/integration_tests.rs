//! Integration tests for the service locator

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use strata_di::prelude::*;
use strata_di::{
    ChangeEvent, Context, Descriptor, ErrorInformation, ErrorKind, Injectee, LifecycleEvent, LifecycleStage,
    OperationContext, Operation, IMMEDIATE, PER_THREAD,
};

// Test services
struct Logger {
    name: String,
}

struct Database {
    url: String,
    logger: Arc<Logger>,
}

struct UserService {
    database: Arc<Database>,
}

fn logger_model() -> Arc<ClassModel> {
    ClassModel::builder::<Logger>("Logger")
        .default_constructor(|| Logger { name: "app".to_string() })
        .build()
}

fn database_model() -> Arc<ClassModel> {
    ClassModel::builder::<Database>("Database")
        .constructor(vec![InjectionPoint::of("Logger")], |args| {
            Ok(Database {
                url: "memory://test".to_string(),
                logger: args.instance::<Logger>()?,
            })
        })
        .build()
}

fn user_service_model() -> Arc<ClassModel> {
    ClassModel::builder::<UserService>("UserService")
        .constructor(vec![InjectionPoint::of("Database")], |args| {
            Ok(UserService {
                database: args.instance::<Database>()?,
            })
        })
        .build()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn test_singleton_and_per_lookup() {
    init_tracing();
    let locator = ServiceLocator::new();
    locator.bind(DescriptorBuilder::class(&logger_model())).unwrap();
    locator
        .bind(DescriptorBuilder::class(&database_model()).in_scope(PER_LOOKUP))
        .unwrap();
    locator.bind(DescriptorBuilder::class(&user_service_model())).unwrap();

    let logger1 = locator.get_service::<Logger>("Logger").unwrap();
    let logger2 = locator.get_service::<Logger>("Logger").unwrap();
    assert!(Arc::ptr_eq(&logger1, &logger2));
    assert_eq!(logger1.name, "app");

    let db1 = locator.get_service::<Database>("Database").unwrap();
    let db2 = locator.get_service::<Database>("Database").unwrap();
    assert!(!Arc::ptr_eq(&db1, &db2));
    assert!(Arc::ptr_eq(&db1.logger, &logger1));

    let users = locator.get_service::<UserService>("UserService").unwrap();
    assert_eq!(users.database.url, "memory://test");
}

struct Greeter(&'static str);

#[test]
fn test_rank_decides_best_service() {
    let locator = ServiceLocator::new();
    let alice = locator
        .bind(DescriptorBuilder::constant("Alice", Greeter("alice")).to("Greeter").rank(1))
        .unwrap();
    let bob = locator
        .bind(DescriptorBuilder::constant("Bob", Greeter("bob")).to("Greeter").rank(5))
        .unwrap();

    assert_eq!(locator.get_service::<Greeter>("Greeter").unwrap().0, "bob");
    let all: Vec<_> = locator
        .get_all_services::<Greeter>("Greeter")
        .unwrap()
        .iter()
        .map(|g| g.0)
        .collect();
    assert_eq!(all, vec!["bob", "alice"]);

    assert_eq!(alice.set_rank(10), 1);
    assert_eq!(locator.get_service::<Greeter>("Greeter").unwrap().0, "alice");
    assert_eq!(bob.rank(), 5);
}

#[test]
fn test_named_lookup() {
    let locator = ServiceLocator::new();
    locator
        .bind(DescriptorBuilder::constant("Alice", Greeter("alice")).to("Greeter").named("a"))
        .unwrap();
    locator
        .bind(DescriptorBuilder::constant("Bob", Greeter("bob")).to("Greeter").named("b").rank(5))
        .unwrap();
    assert_eq!(locator.get_named_service::<Greeter>("Greeter", "a").unwrap().0, "alice");
    assert!(locator
        .try_get_qualified_service::<Greeter>("Greeter", &[Qualifier::named("c")])
        .unwrap()
        .is_none());
}

struct Relaxed {
    optional: Option<Arc<Greeter>>,
}

#[test]
fn test_optional_dependency_absent() {
    let model = ClassModel::builder::<Relaxed>("Relaxed")
        .constructor(vec![InjectionPoint::of("Y").optional()], |args| {
            Ok(Relaxed {
                optional: args.optional::<Greeter>()?,
            })
        })
        .build();
    let locator = ServiceLocator::new();
    locator.bind(DescriptorBuilder::class(&model)).unwrap();
    assert!(locator.get_service::<Relaxed>("Relaxed").unwrap().optional.is_none());
}

#[derive(Debug)]
struct Needy;

#[test]
fn test_unsatisfied_dependencies_are_reported_together() {
    let model = ClassModel::builder::<Needy>("X")
        .constructor(vec![InjectionPoint::of("Z"), InjectionPoint::of("W")], |args| {
            args.instance::<Greeter>()?;
            args.instance::<Greeter>()?;
            Ok(Needy)
        })
        .build();
    let locator = ServiceLocator::new();
    locator.bind(DescriptorBuilder::class(&model)).unwrap();

    let err = locator.get_service::<Needy>("X").unwrap_err();
    assert!(err.is_unsatisfied());
    let text = err.to_string();
    assert!(text.contains("X"));
    assert!(text.contains("Z"));
    assert!(text.contains("W"));

    assert!(locator.try_get_service::<Needy>("Nothing").unwrap().is_none());
    assert!(locator.get_service::<Needy>("Nothing").unwrap_err().is_unsatisfied());
}

struct Engine {
    stopped: Arc<AtomicUsize>,
}

struct Car {
    _engine: Arc<Engine>,
    scrapped: Arc<AtomicUsize>,
}

#[test]
fn test_handle_destroys_per_lookup_dependents_once() {
    let stopped = Arc::new(AtomicUsize::new(0));
    let scrapped = Arc::new(AtomicUsize::new(0));
    let engine_count = stopped.clone();
    let car_count = scrapped.clone();

    let engine = ClassModel::builder::<Engine>("Engine")
        .default_constructor(move || Engine {
            stopped: engine_count.clone(),
        })
        .pre_destroy(|engine| {
            engine.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build();
    let car = ClassModel::builder::<Car>("Car")
        .constructor(vec![InjectionPoint::of("Engine")], move |args| {
            Ok(Car {
                _engine: args.instance::<Engine>()?,
                scrapped: car_count.clone(),
            })
        })
        .pre_destroy(|car| {
            car.scrapped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build();

    let locator = ServiceLocator::new();
    locator.bind(DescriptorBuilder::class(&engine).in_scope(PER_LOOKUP)).unwrap();
    locator.bind(DescriptorBuilder::class(&car).in_scope(PER_LOOKUP)).unwrap();

    let handle = locator.get_service_handle("Car", &[]).unwrap().unwrap();
    assert!(!handle.is_active());
    assert_eq!(handle.descriptor().active_handles(), 1);
    handle.get::<Car>().unwrap();
    assert!(handle.is_active());
    assert_eq!(handle.dependents(), 2);

    handle.destroy();
    handle.destroy();
    assert!(handle.is_destroyed());
    assert_eq!(stopped.load(Ordering::SeqCst), 1);
    assert_eq!(scrapped.load(Ordering::SeqCst), 1);
    assert_eq!(handle.descriptor().active_handles(), 0);
    assert!(handle.get_service().is_err());
}

#[test]
fn test_handle_service_data() {
    let locator = ServiceLocator::new();
    let descriptor = locator.bind(DescriptorBuilder::constant("Greeter", Greeter("hi"))).unwrap();
    let handle = locator.handle_for(&descriptor);
    assert!(handle.service_data().is_none());
    handle.set_service_data(Some(Arc::new(7u32)));
    let data = handle.service_data().unwrap();
    assert_eq!(data.downcast_ref::<u32>(), Some(&7));
}

#[test]
fn test_add_remove_round_trip_notifies_listener() {
    let events: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = events.clone();
    let locator = ServiceLocator::new();
    locator.add_change_listener(ServiceFilter::contract("Greeter"), move |event: &ChangeEvent| {
        seen.lock().push((event.added.len(), event.removed.len()));
    });

    let before = locator.generation();
    locator.bind(DescriptorBuilder::constant("Greeter", Greeter("hi"))).unwrap();
    locator.bind(DescriptorBuilder::constant("Other", 1u8)).unwrap();
    assert!(locator.try_get_service::<Greeter>("Greeter").unwrap().is_some());

    locator.unbind(ServiceFilter::contract("Greeter")).unwrap();
    assert!(locator.try_get_service::<Greeter>("Greeter").unwrap().is_none());
    assert_eq!(locator.generation(), before + 3);
    assert_eq!(*events.lock(), vec![(1, 0), (0, 1)]);
}


#[derive(Debug)]
struct CycleA {
    _b: Arc<CycleB>,
}

#[derive(Debug)]
struct CycleB {
    _a: Arc<CycleA>,
}

#[test]
fn test_singleton_cycle_is_detected() {
    let a = ClassModel::builder::<CycleA>("A")
        .constructor(vec![InjectionPoint::of("B")], |args| {
            Ok(CycleA {
                _b: args.instance::<CycleB>()?,
            })
        })
        .build();
    let b = ClassModel::builder::<CycleB>("B")
        .constructor(vec![InjectionPoint::of("A")], |args| {
            Ok(CycleB {
                _a: args.instance::<CycleA>()?,
            })
        })
        .build();

    let locator = ServiceLocator::new();
    locator.bind(DescriptorBuilder::class(&a)).unwrap();
    locator.bind(DescriptorBuilder::class(&b)).unwrap();

    let err = locator.get_service::<CycleA>("A").unwrap_err();
    assert!(err.is_cycle());
    assert!(err.to_string().contains("A -> B -> A"));
}

struct LazyA {
    b: Arc<LazyB>,
}

struct LazyB {
    a: Lazy<LazyA>,
}

#[test]
fn test_proxy_breaks_cycle() {
    let a = ClassModel::builder::<LazyA>("A")
        .constructor(vec![InjectionPoint::of("B")], |args| {
            Ok(LazyA {
                b: args.instance::<LazyB>()?,
            })
        })
        .build();
    let b = ClassModel::builder::<LazyB>("B")
        .constructor(vec![InjectionPoint::of("A")], |args| Ok(LazyB { a: args.lazy::<LazyA>()? }))
        .build();

    let locator = ServiceLocator::new();
    locator
        .bind(DescriptorBuilder::class(&a).proxy(true).proxy_for_same_scope(true))
        .unwrap();
    locator.bind(DescriptorBuilder::class(&b)).unwrap();

    let a = locator.get_service::<LazyA>("A").unwrap();
    let through_b = a.b.a.get().unwrap();
    assert!(Arc::ptr_eq(&a, &through_b));
    assert!(a.b.a.is_realized());
}

#[derive(Debug)]
struct Ticket {
    serial: usize,
}

struct TicketFactory {
    issued: AtomicUsize,
}

impl Factory for TicketFactory {
    type Product = Ticket;

    fn provide(&self) -> anyhow::Result<Option<Ticket>> {
        let serial = self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Ticket { serial }))
    }
}

fn ticket_factory_model() -> Arc<ClassModel> {
    ClassModel::builder::<TicketFactory>("TicketFactory")
        .default_constructor(|| TicketFactory {
            issued: AtomicUsize::new(0),
        })
        .build()
}

#[test]
fn test_factory_products() {
    let locator = ServiceLocator::new();
    let mut config = locator.configuration();
    let (factory, product) = config.bind_factory::<TicketFactory>(
        DescriptorBuilder::class(&ticket_factory_model()),
        DescriptorBuilder::product("Ticket"),
    );
    config.commit().unwrap();
    assert_eq!(product.factory().map(|f| f.service_id()), Some(factory.service_id()));

    let first = locator.get_service::<Ticket>("Ticket").unwrap();
    let second = locator.get_service::<Ticket>("Ticket").unwrap();
    assert_eq!(first.serial, 0);
    assert_eq!(second.serial, 1);
    assert!(locator.try_get_service::<TicketFactory>("Factory<Ticket>").unwrap().is_some());

    locator.unbind(ServiceFilter::implementation("TicketFactory")).unwrap();
    assert!(locator.try_get_service::<Ticket>("Ticket").unwrap().is_none());
}

struct SelfFeedingFactory;

impl Factory for SelfFeedingFactory {
    type Product = Ticket;

    fn provide(&self) -> anyhow::Result<Option<Ticket>> {
        Ok(Some(Ticket { serial: 0 }))
    }
}

#[test]
fn test_factory_depending_on_its_product_is_a_cycle() {
    let model = ClassModel::builder::<SelfFeedingFactory>("SelfFeedingFactory")
        .constructor(vec![InjectionPoint::of("Ticket")], |args| {
            args.instance::<Ticket>()?;
            Ok(SelfFeedingFactory)
        })
        .build();
    let locator = ServiceLocator::new();
    let mut config = locator.configuration();
    config.bind_factory::<SelfFeedingFactory>(DescriptorBuilder::class(&model), DescriptorBuilder::product("Ticket"));
    config.commit().unwrap();

    let err = locator.get_service::<Ticket>("Ticket").unwrap_err();
    assert!(err.is_cycle());
}

#[derive(Debug)]
struct RequestState {
    closed: Arc<AtomicUsize>,
}

#[test]
fn test_operation_scope() {
    let closed = Arc::new(AtomicUsize::new(0));
    let counter = closed.clone();
    let model = ClassModel::builder::<RequestState>("RequestState")
        .default_constructor(move || RequestState {
            closed: counter.clone(),
        })
        .pre_destroy(|state| {
            state.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build();

    let context = OperationContext::new("Request");
    let locator = ServiceLocator::new();
    locator.add_context(context.clone()).unwrap();
    locator.bind(DescriptorBuilder::class(&model).in_scope("Request")).unwrap();

    let err = locator.get_service::<RequestState>("RequestState").unwrap_err();
    assert!(matches!(err, DiError::ContextNotActive { .. }));

    let first = context.start();
    let a1 = locator.get_service::<RequestState>("RequestState").unwrap();
    let a2 = locator.get_service::<RequestState>("RequestState").unwrap();
    assert!(Arc::ptr_eq(&a1, &a2));

    first.suspend();
    let second = context.start();
    let b = locator.get_service::<RequestState>("RequestState").unwrap();
    assert!(!Arc::ptr_eq(&a1, &b));
    assert_eq!(context.open_operations(), 2);

    second.close();
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    first.activate();
    let again = locator.get_service::<RequestState>("RequestState").unwrap();
    assert!(Arc::ptr_eq(&a1, &again));
    first.close();
    assert_eq!(closed.load(Ordering::SeqCst), 2);
    assert!(!first.is_open());
}

struct Expensive;

#[test]
fn test_concurrent_singleton_created_once() {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    let model = ClassModel::builder::<Expensive>("Expensive")
        .default_constructor(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            Expensive
        })
        .build();
    let locator = ServiceLocator::new();
    locator.bind(DescriptorBuilder::class(&model)).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let locator = locator.clone();
            thread::spawn(move || locator.get_service::<Expensive>("Expensive").unwrap())
        })
        .collect();
    let instances: Vec<Arc<Expensive>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[derive(Debug)]
struct Broken;

#[test]
fn test_error_services_see_failures() {
    let kinds: Arc<Mutex<Vec<ErrorKind>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = kinds.clone();
    let locator = ServiceLocator::new();
    locator.add_error_service(move |info: &ErrorInformation| {
        seen.lock().push(info.kind);
    });

    let err = locator
        .bind(DescriptorBuilder::constant("Lost", 1u8).in_scope("Nowhere"))
        .unwrap_err();
    assert!(err.any(|e| matches!(e, DiError::NoSuchContext { .. })));

    let model = ClassModel::builder::<Broken>("Broken")
        .constructor(Vec::new(), |_| Err(anyhow::anyhow!("boom")))
        .build();
    locator.bind(DescriptorBuilder::class(&model)).unwrap();
    let err = locator.get_service::<Broken>("Broken").unwrap_err();
    assert!(err.to_string().contains("boom"));

    assert_eq!(*kinds.lock(), vec![ErrorKind::DynamicConfiguration, ErrorKind::Creation]);
}

#[test]
fn test_validator_hides_services_on_lookup() {
    let locator = ServiceLocator::new();
    locator.add_validator(|operation: Operation, descriptor: &Descriptor, _: Option<&Injectee>| -> bool {
        operation != Operation::Lookup || !descriptor.has_qualifier("Secret")
    });
    locator
        .bind(DescriptorBuilder::constant("Public", Greeter("public")).to("Greeter"))
        .unwrap();
    locator
        .bind(
            DescriptorBuilder::constant("Hidden", Greeter("hidden"))
                .to("Greeter")
                .qualified_by(Qualifier::new("Secret"))
                .rank(10),
        )
        .unwrap();

    assert_eq!(locator.get_service::<Greeter>("Greeter").unwrap().0, "public");
    assert_eq!(locator.get_all_services::<Greeter>("Greeter").unwrap().len(), 1);
}

#[test]
fn test_validator_vetoes_bind() {
    let locator = ServiceLocator::new();
    locator.add_validator(|operation: Operation, descriptor: &Descriptor, _: Option<&Injectee>| -> bool {
        operation != Operation::Bind || descriptor.implementation_name() != "Forbidden"
    });
    let err = locator.bind(DescriptorBuilder::constant("Forbidden", 0u8)).unwrap_err();
    assert!(err.any(|e| matches!(e, DiError::ValidationRejected { .. })));
    assert!(locator.try_get_service::<u8>("Forbidden").unwrap().is_none());
}

struct Clock(u64);

#[test]
fn test_jit_resolver_binds_on_demand() {
    let locator = ServiceLocator::new();
    locator.add_jit_resolver(|locator: &ServiceLocator, injectee: &Injectee| -> DiResult<bool> {
        if injectee.required().raw_name() != "Clock" {
            return Ok(false);
        }
        locator.bind(DescriptorBuilder::constant("Clock", Clock(42)))?;
        Ok(true)
    });

    assert_eq!(locator.get_service::<Clock>("Clock").unwrap().0, 42);
    assert_eq!(locator.descriptors(&ServiceFilter::contract("Clock")).unwrap().len(), 1);
    assert!(locator.try_get_service::<Clock>("Calendar").unwrap().is_none());
}

#[test]
fn test_greedy_resolution_binds_registered_class() {
    let locator = ServiceLocator::with_config(LocatorConfig {
        greedy_resolution: true,
        ..LocatorConfig::default()
    });
    locator.register_class(&logger_model());
    assert!(locator.descriptors(&ServiceFilter::contract("Logger")).unwrap().is_empty());

    assert_eq!(locator.get_service::<Logger>("Logger").unwrap().name, "app");
    assert_eq!(locator.descriptors(&ServiceFilter::contract("Logger")).unwrap().len(), 1);

    let strict = ServiceLocator::new();
    strict.register_class(&logger_model());
    assert!(strict.try_get_service::<Logger>("Logger").unwrap().is_none());
}

struct Report {
    logger: Arc<Logger>,
    clock: Option<Arc<Clock>>,
    ready: bool,
}

#[test]
fn test_unmanaged_create_and_initialize() {
    let model = ClassModel::builder::<Report>("Report")
        .constructor(vec![InjectionPoint::of("Logger")], |args| {
            Ok(Report {
                logger: args.instance::<Logger>()?,
                clock: None,
                ready: false,
            })
        })
        .field("clock", InjectionPoint::of("Clock").optional(), |report, value| {
            report.clock = value.optional::<Clock>()?;
            Ok(())
        })
        .post_construct(|report| {
            report.ready = true;
            Ok(())
        })
        .build();

    let locator = ServiceLocator::new();
    locator.bind(DescriptorBuilder::class(&logger_model())).unwrap();
    locator.bind(DescriptorBuilder::constant("Clock", Clock(9))).unwrap();

    let report = locator.create_and_initialize::<Report>(&model).unwrap();
    assert_eq!(report.logger.name, "app");
    assert_eq!(report.clock.as_ref().map(|c| c.0), Some(9));
    assert!(report.ready);

    let bare = locator.create::<Report>(&model).unwrap();
    assert!(bare.clock.is_none());
    assert!(!bare.ready);
}

#[derive(Debug)]
struct Introspective {
    me: Arc<Descriptor>,
}

#[test]
fn test_self_injection() {
    let model = ClassModel::builder::<Introspective>("Introspective")
        .constructor(vec![InjectionPoint::self_descriptor()], |args| {
            Ok(Introspective {
                me: args.descriptor()?,
            })
        })
        .build();

    let locator = ServiceLocator::new();
    let descriptor = locator.bind(DescriptorBuilder::class(&model)).unwrap();
    let service = locator.get_service::<Introspective>("Introspective").unwrap();
    assert_eq!(service.me.service_id(), descriptor.service_id());
    assert_eq!(service.me.implementation_name(), "Introspective");

    let err = locator.create::<Introspective>(&model).unwrap_err();
    assert!(err.any(|e| matches!(e, DiError::IllegalSelfInjection { .. })));
}

struct Plugin(&'static str);

#[test]
fn test_iterable_provider_sees_late_bindings() {
    let locator = ServiceLocator::new();
    locator
        .bind(DescriptorBuilder::constant("First", Plugin("first")).to("Plugin").rank(10))
        .unwrap();
    let provider = locator.iterable_provider("Plugin").unwrap();
    let snapshot = provider.snapshot().unwrap();

    let mut iter = provider.iter();
    let first = iter.next().unwrap().unwrap();
    assert_eq!(first.get::<Plugin>().unwrap().0, "first");

    locator
        .bind(DescriptorBuilder::constant("Second", Plugin("second")).to("Plugin"))
        .unwrap();
    let second = iter.next().unwrap().unwrap();
    assert_eq!(second.get::<Plugin>().unwrap().0, "second");
    assert!(iter.next().is_none());

    assert_eq!(snapshot.len(), 1);
    assert_eq!(provider.len().unwrap(), 2);
    let names: Vec<_> = provider.instances::<Plugin>().unwrap().iter().map(|p| p.0).collect();
    assert_eq!(names, vec!["first", "second"]);
}

struct Dashboard {
    plugins: IterableProvider,
}

#[test]
fn test_provider_injection() {
    let model = ClassModel::builder::<Dashboard>("Dashboard")
        .constructor(vec![InjectionPoint::of("Plugin").iterable()], |args| {
            Ok(Dashboard {
                plugins: args.provider()?,
            })
        })
        .build();
    let locator = ServiceLocator::new();
    locator.bind(DescriptorBuilder::class(&model)).unwrap();

    let dashboard = locator.get_service::<Dashboard>("Dashboard").unwrap();
    assert!(dashboard.plugins.is_empty().unwrap());
    locator
        .bind(DescriptorBuilder::constant("Charts", Plugin("charts")).to("Plugin").named("charts"))
        .unwrap();
    assert_eq!(dashboard.plugins.get::<Plugin>().unwrap().0, "charts");
    assert_eq!(dashboard.plugins.named("charts").len().unwrap(), 1);
    assert_eq!(dashboard.plugins.named("maps").len().unwrap(), 0);
}

#[test]
fn test_lifecycle_listener() {
    let stages: Arc<Mutex<Vec<LifecycleStage>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = stages.clone();
    let locator = ServiceLocator::new();
    locator.add_lifecycle_listener(ServiceFilter::contract("Logger"), move |event: &LifecycleEvent<'_>| {
        seen.lock().push(event.stage);
    });
    locator.bind(DescriptorBuilder::class(&logger_model())).unwrap();
    locator.bind(DescriptorBuilder::constant("Clock", Clock(1))).unwrap();

    locator.get_service::<Logger>("Logger").unwrap();
    locator.get_service::<Clock>("Clock").unwrap();
    locator.unbind(ServiceFilter::contract("Logger")).unwrap();

    assert_eq!(
        *stages.lock(),
        vec![
            LifecycleStage::PreProduction,
            LifecycleStage::PostProduction,
            LifecycleStage::PreDestruction
        ]
    );
}

struct Warmup;

#[test]
fn test_immediate_scope_realized_at_commit() {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    let model = ClassModel::builder::<Warmup>("Warmup")
        .default_constructor(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Warmup
        })
        .build();
    let locator = ServiceLocator::new();
    locator.bind(DescriptorBuilder::class(&model).in_scope(IMMEDIATE)).unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 1);

    locator.get_service::<Warmup>("Warmup").unwrap();
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

struct Scratch;

#[test]
fn test_per_thread_scope() {
    let model = ClassModel::builder::<Scratch>("Scratch").default_constructor(|| Scratch).build();
    let locator = ServiceLocator::new();
    locator.bind(DescriptorBuilder::class(&model).in_scope(PER_THREAD)).unwrap();

    let here1 = locator.get_service::<Scratch>("Scratch").unwrap();
    let here2 = locator.get_service::<Scratch>("Scratch").unwrap();
    assert!(Arc::ptr_eq(&here1, &here2));

    let remote = locator.clone();
    let there = thread::spawn(move || remote.get_service::<Scratch>("Scratch").unwrap())
        .join()
        .unwrap();
    assert!(!Arc::ptr_eq(&here1, &there));
}

#[derive(Debug)]
struct Tracked {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

fn tracked_model(name: &'static str, deps: &[&'static str], log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<ClassModel> {
    let log = log.clone();
    let points = deps.iter().map(|d| InjectionPoint::of(*d)).collect();
    ClassModel::builder::<Tracked>(name)
        .constructor(points, move |args| {
            while args.remaining() > 0 {
                args.instance::<Tracked>()?;
            }
            Ok(Tracked { name, log: log.clone() })
        })
        .pre_destroy(|tracked| {
            tracked.log.lock().push(tracked.name);
            Ok(())
        })
        .build()
}

#[test]
fn test_shutdown_disposes_in_reverse_creation_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let locator = ServiceLocator::new();
    locator.bind(DescriptorBuilder::class(&tracked_model("A", &[], &log))).unwrap();
    locator.bind(DescriptorBuilder::class(&tracked_model("B", &["A"], &log))).unwrap();

    locator.get_service::<Tracked>("B").unwrap();
    locator.shutdown();
    assert_eq!(*log.lock(), vec!["B", "A"]);
    assert!(matches!(
        locator.get_service::<Tracked>("A").unwrap_err(),
        DiError::Shutdown { .. }
    ));
}

#[test]
fn test_unbind_disposes_singleton() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let locator = ServiceLocator::new();
    locator.bind(DescriptorBuilder::class(&tracked_model("A", &[], &log))).unwrap();
    locator.get_service::<Tracked>("A").unwrap();

    locator.unbind(ServiceFilter::implementation("A")).unwrap();
    assert_eq!(*log.lock(), vec!["A"]);
}

#[test]
fn test_child_locator_overrides_parent() {
    let parent = ServiceLocator::new();
    parent
        .bind(DescriptorBuilder::constant("ParentGreeter", Greeter("parent")).to("Greeter").rank(10))
        .unwrap();
    let child = parent.create_child("child");
    child
        .bind(DescriptorBuilder::constant("ChildGreeter", Greeter("child")).to("Greeter"))
        .unwrap();

    // Rank wins over locator depth
    assert_eq!(child.get_service::<Greeter>("Greeter").unwrap().0, "parent");
    assert_eq!(parent.get_all_services::<Greeter>("Greeter").unwrap().len(), 1);
    assert_eq!(child.get_all_services::<Greeter>("Greeter").unwrap().len(), 2);
}

struct ReceiptFactory {
    disposed: Arc<AtomicUsize>,
}

impl Factory for ReceiptFactory {
    type Product = Ticket;

    fn provide(&self) -> anyhow::Result<Option<Ticket>> {
        Ok(Some(Ticket { serial: 7 }))
    }

    fn dispose(&self, _ticket: &Ticket) -> anyhow::Result<()> {
        self.disposed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn receipt_locator(factory_scope: &str) -> (ServiceLocator, Arc<AtomicUsize>) {
    let disposed = Arc::new(AtomicUsize::new(0));
    let counter = disposed.clone();
    let model = ClassModel::builder::<ReceiptFactory>("ReceiptFactory")
        .default_constructor(move || ReceiptFactory {
            disposed: counter.clone(),
        })
        .build();
    let locator = ServiceLocator::new();
    let mut config = locator.configuration();
    config.bind_factory::<ReceiptFactory>(
        DescriptorBuilder::class(&model).in_scope(factory_scope),
        DescriptorBuilder::product("Ticket").in_scope(SINGLETON),
    );
    config.commit().unwrap();
    (locator, disposed)
}

#[test]
fn test_shutdown_disposes_factory_products() {
    let (locator, disposed) = receipt_locator(SINGLETON);
    assert_eq!(locator.get_service::<Ticket>("Ticket").unwrap().serial, 7);

    locator.shutdown();
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unbind_disposes_product_of_per_lookup_factory() {
    let (locator, disposed) = receipt_locator(PER_LOOKUP);
    locator.get_service::<Ticket>("Ticket").unwrap();

    locator.unbind(ServiceFilter::implementation("Ticket")).unwrap();
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
    assert!(locator.try_get_service::<Ticket>("Ticket").unwrap().is_none());
}

#[test]
fn test_per_thread_instances_disposed_at_thread_exit() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let locator = ServiceLocator::new();
    locator
        .bind(DescriptorBuilder::class(&tracked_model("Worker", &[], &log)).in_scope(PER_THREAD))
        .unwrap();

    let remote = locator.clone();
    let weak = thread::spawn(move || Arc::downgrade(&remote.get_service::<Tracked>("Worker").unwrap()))
        .join()
        .unwrap();
    assert!(weak.upgrade().is_none());
    assert_eq!(*log.lock(), vec!["Worker"]);

    // The calling thread's cache is untouched
    locator.get_service::<Tracked>("Worker").unwrap();
    locator.shutdown();
    assert_eq!(*log.lock(), vec!["Worker", "Worker"]);
}

#[test]
fn test_readers_never_see_partial_commits() {
    let locator = ServiceLocator::new();
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let locator = locator.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut observed = Vec::new();
            while !done.load(Ordering::SeqCst) {
                observed.push(locator.descriptors(&ServiceFilter::contract("Batch")).unwrap().len());
            }
            observed
        })
    };

    for _ in 0..200 {
        let mut config = locator.configuration();
        for name in ["First", "Second", "Third"] {
            config.bind(DescriptorBuilder::constant(name, 0u8).to("Batch"));
        }
        config.commit().unwrap();
        locator.unbind(ServiceFilter::contract("Batch")).unwrap();
    }
    done.store(true, Ordering::SeqCst);

    let observed = reader.join().unwrap();
    assert!(observed.iter().all(|n| *n == 0 || *n == 3), "saw a partial commit: {:?}", observed);
}

#[test]
fn test_replace_within_one_transaction_reorders() {
    let locator = ServiceLocator::new();
    locator
        .bind(DescriptorBuilder::constant("Alice", Greeter("alice")).to("Greeter"))
        .unwrap();
    let bob = locator
        .bind(DescriptorBuilder::constant("Bob", Greeter("bob")).to("Greeter"))
        .unwrap();
    let names = |locator: &ServiceLocator| -> Vec<&'static str> {
        locator
            .get_all_services::<Greeter>("Greeter")
            .unwrap()
            .iter()
            .map(|g| g.0)
            .collect()
    };
    // Equal ranks keep bind order
    assert_eq!(names(&locator), vec!["alice", "bob"]);

    let mut config = locator.configuration();
    config.unbind_descriptor(&bob);
    config.bind(DescriptorBuilder::constant("Bob", Greeter("bob")).to("Greeter").rank(10));
    config.commit().unwrap();
    assert_eq!(names(&locator), vec!["bob", "alice"]);
    assert_eq!(locator.descriptors(&ServiceFilter::contract("Greeter")).unwrap().len(), 2);
}

#[derive(Debug)]
struct Flaky {
    attempt: usize,
}

#[test]
fn test_failed_singleton_is_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let model = ClassModel::builder::<Flaky>("Flaky")
        .constructor(Vec::new(), move |_| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            if attempt == 0 {
                anyhow::bail!("not ready yet");
            }
            Ok(Flaky { attempt })
        })
        .build();
    let locator = ServiceLocator::new();
    locator.bind(DescriptorBuilder::class(&model)).unwrap();

    let err = locator.get_service::<Flaky>("Flaky").unwrap_err();
    assert!(err.to_string().contains("not ready yet"));

    let first = locator.get_service::<Flaky>("Flaky").unwrap();
    let again = locator.get_service::<Flaky>("Flaky").unwrap();
    assert_eq!(first.attempt, 1);
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

struct Slow;

#[test]
fn test_lookup_waits_for_pre_destroy_to_finish() {
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let created = log.clone();
    let destroyed = log.clone();
    let model = ClassModel::builder::<Slow>("Slow")
        .default_constructor(move || {
            created.lock().push("created");
            Slow
        })
        .pre_destroy(move |_| {
            thread::sleep(Duration::from_millis(100));
            destroyed.lock().push("destroyed");
            Ok(())
        })
        .build();
    let locator = ServiceLocator::new();
    let descriptor = locator.bind(DescriptorBuilder::class(&model)).unwrap();
    let old = locator.get_service::<Slow>("Slow").unwrap();

    let context = locator.context(SINGLETON).unwrap();
    let destroyer = thread::spawn(move || context.destroy_one(&descriptor));
    thread::sleep(Duration::from_millis(30));
    let fresh = locator.get_service::<Slow>("Slow").unwrap();
    destroyer.join().unwrap();

    assert!(!Arc::ptr_eq(&old, &fresh));
    assert_eq!(*log.lock(), vec!["created", "destroyed", "created"]);
}
