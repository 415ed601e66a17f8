//! Class models describe how an implementation is built and injected
//!
//! A [`ClassModel`] plays the part reflection plays in annotation-driven
//! containers: it lists constructors, injectable fields and methods, and the
//! post-construct / pre-destroy hooks. Whatever discovers services (manual
//! registration, generated code, configuration) produces these models; the
//! engine never inspects anything else.
//!
//! Superclasses are modelled by composition. A subclass embeds its base and
//! exposes it through `AsRef`/`AsMut`, so inherited members run against the
//! embedded base value.

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::injectee::{Args, Injection, InjectionPoint};
use crate::service::{expect_mut, expect_ref, Partial, Service};
use crate::types::{IntoTypeRef, TypeRef};

pub(crate) type ConstructFn = Arc<dyn Fn(&mut Args) -> anyhow::Result<Partial> + Send + Sync>;
pub(crate) type FieldFn = Arc<dyn Fn(&mut dyn Any, Injection) -> anyhow::Result<()> + Send + Sync>;
pub(crate) type MethodFn = Arc<dyn Fn(&mut dyn Any, &mut Args) -> anyhow::Result<()> + Send + Sync>;
pub(crate) type PostConstructFn = Arc<dyn Fn(&mut dyn Any) -> anyhow::Result<()> + Send + Sync>;
pub(crate) type PreDestroyFn = Arc<dyn Fn(&dyn Any) -> anyhow::Result<()> + Send + Sync>;

/// Projection from a subclass value to its embedded base
pub(crate) type ProjectMut = fn(&mut dyn Any) -> anyhow::Result<&mut dyn Any>;
pub(crate) type ProjectRef = fn(&dyn Any) -> anyhow::Result<&dyn Any>;

/// What kind of type a class model describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Concrete,
    /// Cannot be subclassed, hence cannot be proxied
    Final,
    Abstract,
    Interface,
}

/// A constructor the container may call
pub struct ConstructorModel {
    pub(crate) params: Vec<InjectionPoint>,
    pub(crate) injectable: bool,
    pub(crate) visible: bool,
    pub(crate) construct: ConstructFn,
}

impl ConstructorModel {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn is_injectable(&self) -> bool {
        self.injectable
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }
}

/// An injectable field
pub struct FieldModel {
    pub(crate) name: Arc<str>,
    pub(crate) point: InjectionPoint,
    pub(crate) set: FieldFn,
}

/// A method; only injectable methods are invoked
pub struct MethodModel {
    pub(crate) name: Arc<str>,
    pub(crate) params: Vec<InjectionPoint>,
    pub(crate) param_types: Vec<String>,
    pub(crate) private: bool,
    pub(crate) injectable: bool,
    pub(crate) invoke: Option<MethodFn>,
}

impl MethodModel {
    /// Name plus parameter types, the key used for override resolution
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.param_types.join(", "))
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub fn is_injectable(&self) -> bool {
        self.injectable
    }
}

pub(crate) struct Superclass {
    pub(crate) model: Arc<ClassModel>,
    pub(crate) project_mut: ProjectMut,
    pub(crate) project_ref: ProjectRef,
}

/// Structural description of an implementation
pub struct ClassModel {
    pub(crate) name: Arc<str>,
    pub(crate) kind: ClassKind,
    pub(crate) instance_type: Option<TypeId>,
    pub(crate) superclass: Option<Superclass>,
    pub(crate) interfaces: Vec<TypeRef>,
    pub(crate) type_params: Vec<Arc<str>>,
    pub(crate) default_scope: Option<Arc<str>>,
    pub(crate) constructors: Vec<ConstructorModel>,
    pub(crate) fields: Vec<FieldModel>,
    pub(crate) methods: Vec<MethodModel>,
    pub(crate) post_construct: Option<PostConstructFn>,
    pub(crate) pre_destroy: Option<PreDestroyFn>,
    pub(crate) issues: Vec<String>,
}

impl ClassModel {
    /// Start describing a concrete class whose instances are `T`
    pub fn builder<T: Service>(name: impl Into<Arc<str>>) -> ClassBuilder<T> {
        ClassBuilder::new(name)
    }

    /// An interface: a contract with no way to build it
    pub fn interface(name: impl Into<Arc<str>>) -> Arc<ClassModel> {
        let mut model = ClassModel::empty(name.into(), ClassKind::Interface, None);
        model.default_scope = None;
        Arc::new(model)
    }

    fn empty(name: Arc<str>, kind: ClassKind, instance_type: Option<TypeId>) -> Self {
        Self {
            name,
            kind,
            instance_type,
            superclass: None,
            interfaces: Vec::new(),
            type_params: Vec::new(),
            default_scope: None,
            constructors: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            post_construct: None,
            pre_destroy: None,
            issues: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    pub fn is_instantiable(&self) -> bool {
        matches!(self.kind, ClassKind::Concrete | ClassKind::Final)
    }

    pub fn superclass(&self) -> Option<&Arc<ClassModel>> {
        self.superclass.as_ref().map(|s| &s.model)
    }

    pub fn interfaces(&self) -> &[TypeRef] {
        &self.interfaces
    }

    pub fn type_params(&self) -> &[Arc<str>] {
        &self.type_params
    }

    pub fn default_scope(&self) -> Option<&str> {
        self.default_scope.as_deref()
    }

    pub fn constructors(&self) -> &[ConstructorModel] {
        &self.constructors
    }

    pub fn methods(&self) -> &[MethodModel] {
        &self.methods
    }

    /// Raw names of every direct supertype
    pub fn direct_supertypes(&self) -> Vec<String> {
        let mut supers: Vec<String> = self.interfaces.iter().map(TypeRef::raw_name).collect();
        if let Some(sup) = &self.superclass {
            supers.push(sup.model.name.to_string());
        }
        supers
    }

    /// Classes from the root superclass down to this one
    pub(crate) fn chain(&self) -> Vec<&ClassModel> {
        let mut chain = vec![self];
        let mut current = self;
        while let Some(sup) = &current.superclass {
            chain.push(&sup.model);
            current = &sup.model;
        }
        chain.reverse();
        chain
    }
}

impl fmt::Debug for ClassModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassModel")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("superclass", &self.superclass().map(|s| s.name()))
            .field("constructors", &self.constructors.len())
            .field("fields", &self.fields.len())
            .field("methods", &self.methods.len())
            .finish()
    }
}

fn project_mut<T: AsMut<B> + 'static, B: 'static>(obj: &mut dyn Any) -> anyhow::Result<&mut dyn Any> {
    Ok(expect_mut::<T>(obj)?.as_mut() as &mut dyn Any)
}

fn project_ref<T: AsRef<B> + 'static, B: 'static>(obj: &dyn Any) -> anyhow::Result<&dyn Any> {
    Ok(expect_ref::<T>(obj)?.as_ref() as &dyn Any)
}

/// Typed builder for [`ClassModel`]
pub struct ClassBuilder<T> {
    model: ClassModel,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Service> ClassBuilder<T> {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            model: ClassModel::empty(name.into(), ClassKind::Concrete, Some(TypeId::of::<T>())),
            _marker: PhantomData,
        }
    }

    pub fn final_class(mut self) -> Self {
        self.model.kind = ClassKind::Final;
        self
    }

    pub fn abstract_class(mut self) -> Self {
        self.model.kind = ClassKind::Abstract;
        self
    }

    /// Declare an implemented interface (also a candidate contract)
    pub fn implements(mut self, ty: impl IntoTypeRef) -> Self {
        match ty.into_type_ref() {
            Ok(ty) => self.model.interfaces.push(ty),
            Err(e) => self.model.issues.push(e.to_string()),
        }
        self
    }

    pub fn type_param(mut self, name: impl Into<Arc<str>>) -> Self {
        self.model.type_params.push(name.into());
        self
    }

    /// Scope used when a descriptor does not name one
    pub fn default_scope(mut self, scope: impl Into<Arc<str>>) -> Self {
        self.model.default_scope = Some(scope.into());
        self
    }

    /// Inherit members from `base`, whose instances `T` embeds
    pub fn extends<B: Service>(mut self, base: &Arc<ClassModel>) -> Self
    where
        T: AsRef<B> + AsMut<B>,
    {
        if base.instance_type.is_some() && base.instance_type != Some(TypeId::of::<B>()) {
            self.model.issues.push(format!(
                "superclass {} does not describe {}",
                base.name,
                std::any::type_name::<B>()
            ));
        }
        if base.kind == ClassKind::Final {
            self.model
                .issues
                .push(format!("cannot extend final class {}", base.name));
        }
        self.model.superclass = Some(Superclass {
            model: base.clone(),
            project_mut: project_mut::<T, B>,
            project_ref: project_ref::<T, B>,
        });
        self
    }

    fn push_constructor<F>(mut self, params: Vec<InjectionPoint>, injectable: bool, visible: bool, f: F) -> Self
    where
        F: Fn(&mut Args) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.model.constructors.push(ConstructorModel {
            params,
            injectable,
            visible,
            construct: Arc::new(move |args: &mut Args| -> anyhow::Result<Partial> {
                Ok(Box::new(f(args)?))
            }),
        });
        self
    }

    /// An injectable constructor
    pub fn constructor<F>(self, params: Vec<InjectionPoint>, f: F) -> Self
    where
        F: Fn(&mut Args) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.push_constructor(params, true, true, f)
    }

    /// A visible zero-argument constructor
    pub fn default_constructor<F>(self, f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.push_constructor(Vec::new(), false, true, move |_| Ok(f()))
    }

    /// A zero-argument constructor that is not reachable from outside the class
    pub fn hidden_constructor<F>(self, f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.push_constructor(Vec::new(), false, false, move |_| Ok(f()))
    }

    /// A constructor with parameters the container will not inject
    pub fn plain_constructor<F>(self, params: Vec<InjectionPoint>, f: F) -> Self
    where
        F: Fn(&mut Args) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.push_constructor(params, false, true, f)
    }

    /// An injectable field
    pub fn field<F>(mut self, name: impl Into<Arc<str>>, point: InjectionPoint, f: F) -> Self
    where
        F: Fn(&mut T, Injection) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.model.fields.push(FieldModel {
            name: name.into(),
            point,
            set: Arc::new(move |obj: &mut dyn Any, value: Injection| -> anyhow::Result<()> {
                f(expect_mut::<T>(obj)?, value)
            }),
        });
        self
    }

    fn push_method<F>(mut self, name: Arc<str>, params: Vec<InjectionPoint>, private: bool, f: F) -> Self
    where
        F: Fn(&mut T, &mut Args) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let param_types = params.iter().map(InjectionPoint::signature_type).collect();
        self.model.methods.push(MethodModel {
            name,
            params,
            param_types,
            private,
            injectable: true,
            invoke: Some(Arc::new(move |obj: &mut dyn Any, args: &mut Args| -> anyhow::Result<()> {
                f(expect_mut::<T>(obj)?, args)
            })),
        });
        self
    }

    /// An injectable method
    pub fn method<F>(self, name: impl Into<Arc<str>>, params: Vec<InjectionPoint>, f: F) -> Self
    where
        F: Fn(&mut T, &mut Args) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.push_method(name.into(), params, false, f)
    }

    /// An injectable private method; never overridden by subclasses
    pub fn private_method<F>(self, name: impl Into<Arc<str>>, params: Vec<InjectionPoint>, f: F) -> Self
    where
        F: Fn(&mut T, &mut Args) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.push_method(name.into(), params, true, f)
    }

    /// A non-injectable method, declared so that it can override a base method
    pub fn plain_method(mut self, name: impl Into<Arc<str>>, param_types: &[&str]) -> Self {
        self.model.methods.push(MethodModel {
            name: name.into(),
            params: Vec::new(),
            param_types: param_types.iter().map(|t| t.to_string()).collect(),
            private: false,
            injectable: false,
            invoke: None,
        });
        self
    }

    pub fn post_construct<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if self.model.post_construct.is_some() {
            self.model
                .issues
                .push(format!("{} declares more than one post-construct hook", self.model.name));
        }
        self.model.post_construct = Some(Arc::new(move |obj: &mut dyn Any| -> anyhow::Result<()> {
            f(expect_mut::<T>(obj)?)
        }));
        self
    }

    pub fn pre_destroy<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if self.model.pre_destroy.is_some() {
            self.model
                .issues
                .push(format!("{} declares more than one pre-destroy hook", self.model.name));
        }
        self.model.pre_destroy = Some(Arc::new(move |obj: &dyn Any| -> anyhow::Result<()> {
            f(expect_ref::<T>(obj)?)
        }));
        self
    }

    pub fn build(self) -> Arc<ClassModel> {
        Arc::new(self.model)
    }
}
