//! Instance lifecycle management
//!
//! Reification turns a class model into a fixed creation plan. Creation
//! resolves every injection point of the plan up front (so that all broken
//! points are reported together), constructs the instance, injects fields
//! and methods superclass first, and runs the post-construct hook. Disposal
//! runs the pre-destroy hook; its failures are reported, never propagated.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::cell::RefCell;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::class::{
    ClassModel, ConstructFn, FieldFn, MethodFn, PostConstructFn, PreDestroyFn, ProjectMut, ProjectRef,
};
use crate::container::ServiceLocator;
use crate::context::Dependents;
use crate::descriptor::{Descriptor, DescriptorKey, Production};
use crate::error::{DiError, DiResult, MultiError};
use crate::injectee::{Args, Injectee, Injection, InjectionPoint, OwnerRef, Position};
use crate::listener::{ErrorKind, LifecycleStage};
use crate::provider::FactoryProduct;
use crate::resolver;
use crate::service::{Instance, Partial};

thread_local! {
    /// Descriptors being created on this thread, outermost first
    static CREATING: RefCell<Vec<(DescriptorKey, String)>> = const { RefCell::new(Vec::new()) };
}

struct ChainGuard;

impl ChainGuard {
    fn enter(descriptor: &Descriptor) -> DiResult<Self> {
        let key = descriptor.key();
        let reentered = CREATING.with(|chain| chain.borrow().iter().any(|(k, _)| *k == key));
        if reentered {
            return Err(cycle_error(descriptor));
        }
        CREATING.with(|chain| {
            chain
                .borrow_mut()
                .push((key, descriptor.implementation_name().to_string()))
        });
        Ok(ChainGuard)
    }
}

impl Drop for ChainGuard {
    fn drop(&mut self) {
        CREATING.with(|chain| {
            chain.borrow_mut().pop();
        });
    }
}

/// Cycle error naming the creation chain that leads back to `descriptor`
pub(crate) fn cycle_error(descriptor: &Descriptor) -> DiError {
    let key = descriptor.key();
    let mut names: Vec<String> = CREATING.with(|chain| {
        chain
            .borrow()
            .iter()
            .skip_while(|(k, _)| *k != key)
            .map(|(_, name)| name.clone())
            .collect()
    });
    names.push(descriptor.implementation_name().to_string());
    let chain = names.join(" -> ");
    debug!("cycle detected: {}", chain);
    DiError::CycleDetected { chain }
}

struct ConstructorPlan {
    injectees: Vec<Injectee>,
    construct: ConstructFn,
}

enum MemberPlan {
    Field {
        path: Vec<ProjectMut>,
        injectee: Injectee,
        set: FieldFn,
    },
    Method {
        path: Vec<ProjectMut>,
        injectees: Vec<Injectee>,
        invoke: MethodFn,
    },
}

enum MemberValue {
    Field(Injection),
    Method(Vec<Injection>),
}

/// Analyzed creation plan of one descriptor
#[derive(Default)]
pub(crate) struct Reified {
    constructor: Option<ConstructorPlan>,
    members: Vec<MemberPlan>,
    post_construct: Option<(Vec<ProjectMut>, PostConstructFn)>,
    pre_destroy: Option<(Vec<ProjectRef>, PreDestroyFn)>,
}

impl Reified {
    /// Every injection point in resolution order
    pub(crate) fn injectees(&self) -> Vec<&Injectee> {
        let mut all: Vec<&Injectee> = Vec::new();
        if let Some(ctor) = &self.constructor {
            all.extend(ctor.injectees.iter());
        }
        for member in &self.members {
            match member {
                MemberPlan::Field { injectee, .. } => all.push(injectee),
                MemberPlan::Method { injectees, .. } => all.extend(injectees.iter()),
            }
        }
        all
    }
}

fn reify_points(
    points: &[InjectionPoint],
    position: impl Fn(usize) -> Position,
    owner: &Option<OwnerRef>,
    errors: &mut Vec<String>,
) -> Vec<Injectee> {
    let mut injectees = Vec::with_capacity(points.len());
    for (index, point) in points.iter().enumerate() {
        match point.reify(position(index), owner.clone()) {
            Ok(injectee) => injectees.push(injectee),
            Err(issues) => errors.extend(issues),
        }
    }
    injectees
}

/// Analyze a class model; `proxied` adds the proxiability checks
pub(crate) fn reify_class(model: &ClassModel, owner: Option<OwnerRef>, label: &str, proxied: bool) -> DiResult<Reified> {
    let mut issues: Vec<String> = Vec::new();
    let mut errors = MultiError::new();
    let chain = model.chain();

    for class in &chain {
        issues.extend(class.issues.iter().cloned());
    }
    if !model.is_instantiable() {
        issues.push(format!("{} is {:?} and cannot be instantiated", model.name(), model.kind()));
    }
    if proxied {
        if model.kind() == crate::class::ClassKind::Final {
            errors.push(DiError::NotProxiable {
                implementation: model.name().to_string(),
                reason: "the class is final".to_string(),
            });
        }
        if !model.constructors.iter().any(|c| c.is_visible()) {
            errors.push(DiError::NotProxiable {
                implementation: model.name().to_string(),
                reason: "the class has no visible constructor".to_string(),
            });
        }
    }

    let injectable: Vec<_> = model.constructors.iter().filter(|c| c.is_injectable()).collect();
    let chosen = match injectable.len() {
        0 => model.constructors.iter().find(|c| c.arity() == 0),
        1 => Some(injectable[0]),
        n => {
            issues.push(format!("{} declares {} injectable constructors", model.name(), n));
            None
        }
    };
    if chosen.is_none() && injectable.len() <= 1 && model.is_instantiable() {
        issues.push(format!(
            "{} has neither an injectable nor a zero-argument constructor",
            model.name()
        ));
    }
    let constructor = chosen.map(|c| ConstructorPlan {
        injectees: reify_points(&c.params, |index| Position::Constructor { index }, &owner, &mut issues),
        construct: c.construct.clone(),
    });

    // Projection paths from the leaf down to each class of the chain
    let depth = chain.len();
    let mut mut_paths: Vec<Vec<ProjectMut>> = vec![Vec::new(); depth];
    let mut ref_paths: Vec<Vec<ProjectRef>> = vec![Vec::new(); depth];
    for k in (0..depth.saturating_sub(1)).rev() {
        if let Some(sup) = &chain[k + 1].superclass {
            let mut m = mut_paths[k + 1].clone();
            m.push(sup.project_mut);
            mut_paths[k] = m;
            let mut r = ref_paths[k + 1].clone();
            r.push(sup.project_ref);
            ref_paths[k] = r;
        }
    }

    // The most derived non-private declaration of a signature wins
    let mut winners: FxHashMap<String, usize> = FxHashMap::default();
    for (k, class) in chain.iter().enumerate() {
        for method in class.methods.iter().filter(|m| !m.is_private()) {
            winners.insert(method.signature(), k);
        }
    }

    let mut members = Vec::new();
    for (k, class) in chain.iter().enumerate() {
        for field in &class.fields {
            let position = Position::Field { name: field.name.clone() };
            match field.point.reify(position, owner.clone()) {
                Ok(injectee) => members.push(MemberPlan::Field {
                    path: mut_paths[k].clone(),
                    injectee,
                    set: field.set.clone(),
                }),
                Err(found) => issues.extend(found),
            }
        }
        for method in &class.methods {
            let Some(invoke) = method.invoke.clone() else {
                continue;
            };
            if !method.is_private() && winners.get(&method.signature()) != Some(&k) {
                trace!("{} is overridden below {}", method.signature(), class.name());
                continue;
            }
            let name = method.name.clone();
            let injectees = reify_points(
                &method.params,
                |index| Position::Method { name: name.clone(), index },
                &owner,
                &mut issues,
            );
            members.push(MemberPlan::Method {
                path: mut_paths[k].clone(),
                injectees,
                invoke,
            });
        }
    }

    let post_construct = (0..depth)
        .rev()
        .find_map(|k| chain[k].post_construct.clone().map(|hook| (mut_paths[k].clone(), hook)));
    let pre_destroy = (0..depth)
        .rev()
        .find_map(|k| chain[k].pre_destroy.clone().map(|hook| (ref_paths[k].clone(), hook)));

    for reason in issues {
        errors.push(DiError::Reification {
            descriptor: label.to_string(),
            reason,
        });
    }
    errors.into_result(Reified {
        constructor,
        members,
        post_construct,
        pre_destroy,
    })
}

/// Cached creation plan of `descriptor`; failures are cached too
pub(crate) fn reified(locator: &ServiceLocator, descriptor: &Arc<Descriptor>) -> DiResult<Arc<Reified>> {
    descriptor
        .reified_cell()
        .get_or_init(|| {
            let result = match descriptor.production() {
                Production::Class(model) => reify_class(
                    model,
                    Some(OwnerRef::of(descriptor)),
                    &descriptor.to_string(),
                    locator.is_proxiable(descriptor),
                )
                .map(Arc::new),
                _ => Ok(Arc::new(Reified::default())),
            };
            match &result {
                Ok(_) => trace!("reified {}", descriptor),
                Err(e) => {
                    warn!("failed to reify {}: {}", descriptor, e);
                    locator.report(ErrorKind::Reification, Some(descriptor), e);
                }
            }
            result
        })
        .clone()
}

fn project<'a>(mut target: &'a mut dyn Any, path: &[ProjectMut]) -> anyhow::Result<&'a mut dyn Any> {
    for step in path {
        target = step(target)?;
    }
    Ok(target)
}

fn project_ref<'a>(mut target: &'a dyn Any, path: &[ProjectRef]) -> anyhow::Result<&'a dyn Any> {
    for step in path {
        target = step(target)?;
    }
    Ok(target)
}

fn resolve_all(
    locator: &ServiceLocator,
    injectees: &[Injectee],
    root: Option<&Dependents>,
    errors: &mut MultiError,
) -> Vec<Injection> {
    injectees
        .iter()
        .map(|injectee| match resolver::resolve(locator, injectee, root) {
            Ok(value) => value,
            Err(e) => {
                errors.push(e);
                Injection::Absent
            }
        })
        .collect()
}

fn resolve_members(
    locator: &ServiceLocator,
    members: &[MemberPlan],
    root: Option<&Dependents>,
    errors: &mut MultiError,
) -> Vec<MemberValue> {
    members
        .iter()
        .map(|member| match member {
            MemberPlan::Field { injectee, .. } => {
                MemberValue::Field(resolve_all(locator, std::slice::from_ref(injectee), root, errors).remove(0))
            }
            MemberPlan::Method { injectees, .. } => {
                MemberValue::Method(resolve_all(locator, injectees, root, errors))
            }
        })
        .collect()
}

fn apply_members(target: &mut dyn Any, members: &[MemberPlan], values: Vec<MemberValue>) -> anyhow::Result<()> {
    for (member, value) in members.iter().zip(values) {
        match (member, value) {
            (MemberPlan::Field { path, set, .. }, MemberValue::Field(injection)) => {
                set(project(&mut *target, path)?, injection)?;
            }
            (MemberPlan::Method { path, invoke, .. }, MemberValue::Method(injections)) => {
                invoke(project(&mut *target, path)?, &mut Args::new(injections))?;
            }
            _ => anyhow::bail!("member values out of order"),
        }
    }
    Ok(())
}

fn run_post_construct(target: &mut dyn Any, reified: &Reified) -> anyhow::Result<()> {
    if let Some((path, hook)) = &reified.post_construct {
        hook(project(target, path)?)?;
    }
    Ok(())
}

fn run_pre_destroy(target: &dyn Any, reified: &Reified) -> anyhow::Result<()> {
    if let Some((path, hook)) = &reified.pre_destroy {
        hook(project_ref(target, path)?)?;
    }
    Ok(())
}

fn construct(locator: &ServiceLocator, reified: &Reified, root: Option<&Dependents>, label: &str) -> DiResult<Partial> {
    let Some(ctor) = &reified.constructor else {
        return Err(DiError::Reification {
            descriptor: label.to_string(),
            reason: "no constructor to call".to_string(),
        });
    };
    let mut errors = MultiError::new();
    let args = resolve_all(locator, &ctor.injectees, root, &mut errors);
    errors.into_result(())?;
    (ctor.construct)(&mut Args::new(args)).map_err(|e| DiError::creation(label, e))
}

fn build(locator: &ServiceLocator, reified: &Reified, root: Option<&Dependents>, label: &str) -> DiResult<Instance> {
    let ctor = reified.constructor.as_ref().ok_or_else(|| DiError::Reification {
        descriptor: label.to_string(),
        reason: "no constructor to call".to_string(),
    })?;

    let mut errors = MultiError::new();
    let args = resolve_all(locator, &ctor.injectees, root, &mut errors);
    let values = resolve_members(locator, &reified.members, root, &mut errors);
    errors.into_result(())?;

    let mut object = (ctor.construct)(&mut Args::new(args)).map_err(|e| DiError::creation(label, e))?;
    let target = (*object).as_any_mut();
    apply_members(&mut *target, &reified.members, values).map_err(|e| DiError::creation(label, e))?;
    run_post_construct(target, reified).map_err(|e| DiError::creation(label, e))?;
    Ok(Arc::from(object))
}

fn produce(
    locator: &ServiceLocator,
    descriptor: &Arc<Descriptor>,
    product: &FactoryProduct,
    root: Option<&Dependents>,
    producer: &Mutex<Option<Instance>>,
) -> DiResult<Option<Instance>> {
    let factory = product.factory().ok_or_else(|| DiError::Reification {
        descriptor: descriptor.to_string(),
        reason: "factory product is not bound to a factory".to_string(),
    })?;
    let factory_instance = locator
        .instance_for(factory, root)?
        .ok_or_else(|| DiError::NullNotSupported {
            descriptor: factory.to_string(),
            scope: factory.scope().to_string(),
        })?;
    *producer.lock() = Some(factory_instance.clone());
    product
        .provide(&factory_instance)
        .map_err(|e| DiError::creation(descriptor.to_string(), e))
}

/// Produce a new instance of `descriptor`; nothing is cached here
///
/// For factory products the factory instance that provided the product is
/// left in `producer` so that the product can be disposed through it.
pub(crate) fn create(
    locator: &ServiceLocator,
    descriptor: &Arc<Descriptor>,
    root: Option<&Dependents>,
    producer: &Mutex<Option<Instance>>,
) -> DiResult<Option<Instance>> {
    let _guard = ChainGuard::enter(descriptor)?;
    locator.notify_lifecycle(LifecycleStage::PreProduction, descriptor, None);
    trace!("creating {}", descriptor);

    let result = match descriptor.production() {
        Production::Constant(instance) => Ok(Some(instance.clone())),
        Production::Factory(product) => {
            produce(locator, descriptor, product, root, producer).map_err(|e| wrap(descriptor, e))
        }
        Production::Class(_) => reified(locator, descriptor).and_then(|plan| {
            build(locator, &plan, root, &descriptor.to_string())
                .map(Some)
                .map_err(|e| wrap(descriptor, e))
        }),
    };

    match &result {
        Ok(instance) => {
            debug!("created {}", descriptor);
            locator.notify_lifecycle(LifecycleStage::PostProduction, descriptor, instance.as_ref());
        }
        Err(e) => {
            debug!("failed to create {}: {}", descriptor, e);
            locator.report(ErrorKind::Creation, Some(descriptor), e);
        }
    }
    result
}

fn wrap(descriptor: &Descriptor, error: DiError) -> DiError {
    let label = descriptor.to_string();
    let wrapped = matches!(&error, DiError::CreationFailed { descriptor, .. } if *descriptor == label);
    if wrapped {
        error
    } else {
        DiError::creation_from(label, error)
    }
}

/// Run pre-destroy for an instance a context released
pub(crate) fn dispose(
    locator: &ServiceLocator,
    descriptor: &Arc<Descriptor>,
    instance: &Instance,
    producer: Option<&Instance>,
) {
    locator.notify_lifecycle(LifecycleStage::PreDestruction, descriptor, Some(instance));
    let result = match descriptor.production() {
        Production::Constant(_) => Ok(()),
        Production::Class(_) => reified(locator, descriptor).and_then(|plan| {
            run_pre_destroy((**instance).as_any(), &plan).map_err(|e| DiError::creation(descriptor.to_string(), e))
        }),
        Production::Factory(product) => match producer {
            Some(factory) => product
                .dispose(factory, instance)
                .map_err(|e| DiError::creation(descriptor.to_string(), e)),
            None => {
                trace!("no producing factory recorded for {}, skipping dispose", descriptor);
                Ok(())
            }
        },
    };
    match result {
        Ok(()) => trace!("disposed {}", descriptor),
        Err(e) => {
            warn!("failed to dispose {}: {}", descriptor, e);
            locator.report(ErrorKind::Destruction, Some(descriptor), &e);
        }
    }
}

fn unmanaged_plan(model: &ClassModel) -> DiResult<Reified> {
    let plan = reify_class(model, Some(OwnerRef::unmanaged(model.name())), model.name(), false)?;
    if let Some(injectee) = plan.injectees().into_iter().find(|i| i.is_self()) {
        return Err(DiError::IllegalSelfInjection {
            injectee: injectee.to_string(),
            reason: "self injection requires a managed descriptor".to_string(),
        });
    }
    Ok(plan)
}

/// Construct an instance of an unmanaged class (constructor injection only)
pub(crate) fn create_unmanaged(locator: &ServiceLocator, model: &ClassModel) -> DiResult<Partial> {
    let plan = unmanaged_plan(model)?;
    construct(locator, &plan, None, model.name()).map_err(|e| DiError::creation_from(model.name(), e))
}

/// Field and method injection into an existing value
pub(crate) fn inject_unmanaged(locator: &ServiceLocator, target: &mut dyn Any, model: &ClassModel) -> DiResult<()> {
    let plan = unmanaged_plan(model)?;
    let mut errors = MultiError::new();
    let values = resolve_members(locator, &plan.members, None, &mut errors);
    errors.into_result(())?;
    apply_members(target, &plan.members, values).map_err(|e| DiError::creation(model.name(), e))
}

pub(crate) fn post_construct_unmanaged(target: &mut dyn Any, model: &ClassModel) -> DiResult<()> {
    let plan = unmanaged_plan(model)?;
    run_post_construct(target, &plan).map_err(|e| DiError::creation(model.name(), e))
}

pub(crate) fn pre_destroy_unmanaged(target: &dyn Any, model: &ClassModel) -> DiResult<()> {
    let plan = unmanaged_plan(model)?;
    run_pre_destroy(target, &plan).map_err(|e| DiError::creation(model.name(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassModel;

    #[derive(Default)]
    struct Base {
        log: Vec<String>,
    }

    #[derive(Default)]
    struct Derived {
        base: Base,
    }

    impl AsRef<Base> for Derived {
        fn as_ref(&self) -> &Base {
            &self.base
        }
    }

    impl AsMut<Base> for Derived {
        fn as_mut(&mut self) -> &mut Base {
            &mut self.base
        }
    }

    fn base_model() -> Arc<ClassModel> {
        ClassModel::builder::<Base>("Base")
            .default_constructor(Base::default)
            .method("init", vec![], |b, _| {
                b.log.push("base.init".into());
                Ok(())
            })
            .private_method("setup", vec![], |b, _| {
                b.log.push("base.setup".into());
                Ok(())
            })
            .method("configure", vec![], |b, _| {
                b.log.push("base.configure".into());
                Ok(())
            })
            .build()
    }

    #[test]
    fn test_override_rules() {
        let derived = ClassModel::builder::<Derived>("Derived")
            .extends::<Base>(&base_model())
            .default_constructor(Derived::default)
            .method("init", vec![], |d, _| {
                d.base.log.push("derived.init".into());
                Ok(())
            })
            .private_method("setup", vec![], |d, _| {
                d.base.log.push("derived.setup".into());
                Ok(())
            })
            .plain_method("configure", &[])
            .build();
        let plan = reify_class(&derived, None, "Derived", false).unwrap();

        let mut value = Derived::default();
        let values = plan
            .members
            .iter()
            .map(|m| match m {
                MemberPlan::Field { .. } => MemberValue::Field(Injection::Absent),
                MemberPlan::Method { .. } => MemberValue::Method(Vec::new()),
            })
            .collect();
        apply_members(&mut value, &plan.members, values).unwrap();
        assert_eq!(
            value.base.log,
            vec!["base.setup", "derived.init", "derived.setup"]
        );
    }

    #[test]
    fn test_multiple_injectable_constructors() {
        let model = ClassModel::builder::<Base>("Base")
            .constructor(vec![], |_| Ok(Base::default()))
            .constructor(vec![InjectionPoint::of("Log")], |_| Ok(Base::default()))
            .build();
        let err = reify_class(&model, None, "Base", false).err().unwrap();
        assert!(err.to_string().contains("2 injectable constructors"));
    }

    #[test]
    fn test_no_usable_constructor() {
        let model = ClassModel::builder::<Base>("Base")
            .plain_constructor(vec![InjectionPoint::of("Log")], |_| Ok(Base::default()))
            .build();
        assert!(reify_class(&model, None, "Base", false).is_err());
    }

    #[test]
    fn test_proxiability() {
        let final_class = ClassModel::builder::<Base>("Base")
            .final_class()
            .default_constructor(Base::default)
            .build();
        assert!(reify_class(&final_class, None, "Base", false).is_ok());
        let err = reify_class(&final_class, None, "Base", true).err().unwrap();
        assert!(matches!(err, DiError::NotProxiable { .. }));

        let hidden = ClassModel::builder::<Base>("Base")
            .hidden_constructor(Base::default)
            .build();
        assert!(reify_class(&hidden, None, "Base", true).is_err());
    }

    #[test]
    fn test_all_reification_issues_are_collected() {
        let model = ClassModel::builder::<Base>("Base")
            .constructor(vec![InjectionPoint::of("Provider")], |_| Ok(Base::default()))
            .field("a", InjectionPoint::of("List<"), |_, _| Ok(()))
            .field("b", InjectionPoint::of("Engine").self_ref(), |_, _| Ok(()))
            .build();
        let err = reify_class(&model, None, "Base", false).err().unwrap();
        assert_eq!(err.errors().len(), 3);
    }

    #[test]
    fn test_post_construct_runs_through_projection() {
        let base = ClassModel::builder::<Base>("Base")
            .default_constructor(Base::default)
            .post_construct(|b| {
                b.log.push("ready".into());
                Ok(())
            })
            .build();
        let derived = ClassModel::builder::<Derived>("Derived")
            .extends::<Base>(&base)
            .default_constructor(Derived::default)
            .build();
        let plan = reify_class(&derived, None, "Derived", false).unwrap();
        let mut value = Derived::default();
        run_post_construct(&mut value, &plan).unwrap();
        assert_eq!(value.base.log, vec!["ready"]);
    }
}
