//! Type expressions for contracts and injection points
//!
//! Contracts are matched by name, so types are modelled as structured
//! expressions rather than Rust `TypeId`s. Parameterized contracts are matched
//! with the usual relaxations: a raw type matches any parameterization, bounded
//! wildcards restrict to compatible arguments, and type variables match anything
//! their bound admits.

use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{DiError, DiResult};

/// The universal supertype
pub const OBJECT: &str = "Object";

/// A type expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeRef {
    /// A class or interface, raw when `args` is empty
    Class { name: Arc<str>, args: Vec<TypeRef> },
    /// An array of the component type
    Array(Box<TypeRef>),
    /// `?`, `? extends upper` or `? super lower`
    Wildcard {
        upper: Option<Box<TypeRef>>,
        lower: Option<Box<TypeRef>>,
    },
    /// A type variable with an optional bound
    Variable {
        name: Arc<str>,
        bound: Option<Box<TypeRef>>,
    },
}

impl TypeRef {
    /// A raw class type
    pub fn class(name: impl Into<Arc<str>>) -> Self {
        TypeRef::Class {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// A parameterized class type
    pub fn parameterized(name: impl Into<Arc<str>>, args: Vec<TypeRef>) -> Self {
        TypeRef::Class {
            name: name.into(),
            args,
        }
    }

    /// An unbounded type variable
    pub fn var(name: impl Into<Arc<str>>) -> Self {
        TypeRef::Variable {
            name: name.into(),
            bound: None,
        }
    }

    /// A bounded type variable
    pub fn bounded_var(name: impl Into<Arc<str>>, bound: TypeRef) -> Self {
        TypeRef::Variable {
            name: name.into(),
            bound: Some(Box::new(bound)),
        }
    }

    /// `?`
    pub fn wildcard() -> Self {
        TypeRef::Wildcard {
            upper: None,
            lower: None,
        }
    }

    /// `? extends upper`
    pub fn extends(upper: TypeRef) -> Self {
        TypeRef::Wildcard {
            upper: Some(Box::new(upper)),
            lower: None,
        }
    }

    /// `? super lower`
    pub fn super_of(lower: TypeRef) -> Self {
        TypeRef::Wildcard {
            upper: None,
            lower: Some(Box::new(lower)),
        }
    }

    /// `component[]`
    pub fn array(component: TypeRef) -> Self {
        TypeRef::Array(Box::new(component))
    }

    /// Parse the textual form, e.g. `Map<String, ? extends Shape>` or `Foo[]`
    pub fn parse(text: &str) -> DiResult<Self> {
        let mut parser = Parser {
            text,
            chars: text.char_indices().collect(),
            pos: 0,
        };
        let ty = parser.parse_type()?;
        parser.skip_ws();
        if parser.pos != parser.chars.len() {
            return Err(parser.error("trailing characters"));
        }
        Ok(ty)
    }

    /// The name used to index this type: class name, `name[]` for arrays
    pub fn raw_name(&self) -> String {
        match self {
            TypeRef::Class { name, .. } => name.to_string(),
            TypeRef::Array(component) => format!("{}[]", component.raw_name()),
            TypeRef::Wildcard { upper: Some(u), .. } => u.raw_name(),
            TypeRef::Wildcard { .. } => OBJECT.to_string(),
            TypeRef::Variable { bound: Some(b), .. } => b.raw_name(),
            TypeRef::Variable { .. } => OBJECT.to_string(),
        }
    }

    /// Type arguments of a parameterized class
    pub fn args(&self) -> &[TypeRef] {
        match self {
            TypeRef::Class { args, .. } => args,
            _ => &[],
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, TypeRef::Class { args, .. } if args.is_empty())
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, TypeRef::Wildcard { .. })
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, TypeRef::Variable { .. })
    }

    /// Replace class references named after `params` with type variables
    pub fn bind_variables(&self, params: &[Arc<str>]) -> TypeRef {
        match self {
            TypeRef::Class { name, args } if args.is_empty() && params.contains(name) => {
                TypeRef::var(name.clone())
            }
            TypeRef::Class { name, args } => TypeRef::Class {
                name: name.clone(),
                args: args.iter().map(|a| a.bind_variables(params)).collect(),
            },
            TypeRef::Array(component) => TypeRef::array(component.bind_variables(params)),
            TypeRef::Wildcard { upper, lower } => TypeRef::Wildcard {
                upper: upper.as_ref().map(|u| Box::new(u.bind_variables(params))),
                lower: lower.as_ref().map(|l| Box::new(l.bind_variables(params))),
            },
            TypeRef::Variable { .. } => self.clone(),
        }
    }

    /// Reasons this type can never be requested directly
    pub fn request_issues(&self) -> Option<&'static str> {
        match self {
            TypeRef::Wildcard { .. } => Some("a wildcard cannot be requested directly"),
            TypeRef::Variable { .. } => Some("a type variable cannot be requested directly"),
            TypeRef::Array(component) => component.request_issues(),
            TypeRef::Class { args, .. } => args.iter().find_map(|a| match a {
                TypeRef::Wildcard {
                    upper: Some(_),
                    lower: Some(_),
                } => Some("a wildcard cannot carry both bounds"),
                other => other.nested_issues(),
            }),
        }
    }

    fn nested_issues(&self) -> Option<&'static str> {
        match self {
            TypeRef::Class { args, .. } => args.iter().find_map(|a| a.nested_issues()),
            TypeRef::Array(component) => component.nested_issues(),
            TypeRef::Wildcard {
                upper: Some(_),
                lower: Some(_),
            } => Some("a wildcard cannot carry both bounds"),
            _ => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Class { name, args } => {
                write!(f, "{}", name)?;
                if !args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            TypeRef::Array(component) => write!(f, "{}[]", component),
            TypeRef::Wildcard { upper: Some(u), .. } => write!(f, "? extends {}", u),
            TypeRef::Wildcard { lower: Some(l), .. } => write!(f, "? super {}", l),
            TypeRef::Wildcard { .. } => write!(f, "?"),
            TypeRef::Variable { name, bound: Some(b) } => write!(f, "{} extends {}", name, b),
            TypeRef::Variable { name, .. } => write!(f, "{}", name),
        }
    }
}

/// Conversion into a type expression, parsing text forms
pub trait IntoTypeRef {
    fn into_type_ref(self) -> DiResult<TypeRef>;
}

impl IntoTypeRef for TypeRef {
    fn into_type_ref(self) -> DiResult<TypeRef> {
        Ok(self)
    }
}

impl IntoTypeRef for &TypeRef {
    fn into_type_ref(self) -> DiResult<TypeRef> {
        Ok(self.clone())
    }
}

impl IntoTypeRef for &str {
    fn into_type_ref(self) -> DiResult<TypeRef> {
        TypeRef::parse(self)
    }
}

impl IntoTypeRef for String {
    fn into_type_ref(self) -> DiResult<TypeRef> {
        TypeRef::parse(&self)
    }
}

impl IntoTypeRef for &String {
    fn into_type_ref(self) -> DiResult<TypeRef> {
        TypeRef::parse(self)
    }
}

struct Parser<'a> {
    text: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, what: &str) -> DiError {
        DiError::InvalidArgument(format!(
            "malformed type '{}' at offset {}: {}",
            self.text, self.pos, what
        ))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> DiResult<String> {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            let ok = if self.pos == start {
                c.is_alphabetic() || c == '_' || c == '$'
            } else {
                c.is_alphanumeric() || matches!(c, '_' | '$' | '.' | ':')
            };
            if !ok {
                break;
            }
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected a type name"));
        }
        Ok(self.chars[start..self.pos].iter().map(|(_, c)| c).collect())
    }

    fn keyword(&mut self, word: &str) -> bool {
        self.skip_ws();
        let save = self.pos;
        match self.ident() {
            Ok(found) if found == word => true,
            _ => {
                self.pos = save;
                false
            }
        }
    }

    fn parse_type(&mut self) -> DiResult<TypeRef> {
        let mut ty = if self.eat('?') {
            if self.keyword("extends") {
                TypeRef::extends(self.parse_type()?)
            } else if self.keyword("super") {
                TypeRef::super_of(self.parse_type()?)
            } else {
                TypeRef::wildcard()
            }
        } else {
            let name = self.ident()?;
            let mut args = Vec::new();
            if self.eat('<') {
                loop {
                    args.push(self.parse_type()?);
                    if self.eat(',') {
                        continue;
                    }
                    if self.eat('>') {
                        break;
                    }
                    return Err(self.error("expected ',' or '>'"));
                }
            }
            TypeRef::parameterized(name, args)
        };
        while self.eat('[') {
            if !self.eat(']') {
                return Err(self.error("expected ']'"));
            }
            ty = TypeRef::array(ty);
        }
        Ok(ty)
    }
}

/// Raw subtype relation known to a registry snapshot
#[derive(Debug, Clone, Default)]
pub struct TypeHierarchy {
    supertypes: FxHashMap<String, Vec<String>>,
}

impl TypeHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `sub` directly extends or implements each of `supers`
    pub fn declare(&mut self, sub: &str, supers: impl IntoIterator<Item = String>) {
        let entry = self.supertypes.entry(sub.to_string()).or_default();
        for sup in supers {
            if !entry.contains(&sup) {
                entry.push(sup);
            }
        }
    }

    /// Whether `sub` is `sup` or transitively extends it
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        if sub == sup || sup == OBJECT {
            return true;
        }
        let mut seen = FxHashSet::default();
        let mut stack = vec![sub];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(parents) = self.supertypes.get(current) {
                for parent in parents {
                    if parent == sup {
                        return true;
                    }
                    stack.push(parent);
                }
            }
        }
        false
    }
}

/// Whether a descriptor advertising `advertised` satisfies a request for `required`
pub fn contract_matches(required: &TypeRef, advertised: &TypeRef, types: &TypeHierarchy) -> bool {
    match (required, advertised) {
        (
            TypeRef::Class { name: rn, args: ra },
            TypeRef::Class { name: an, args: aa },
        ) => {
            if rn != an {
                return false;
            }
            if ra.is_empty() || aa.is_empty() {
                return true;
            }
            ra.len() == aa.len() && ra.iter().zip(aa).all(|(r, a)| argument_matches(r, a, types))
        }
        (TypeRef::Array(r), TypeRef::Array(a)) => argument_matches(r, a, types),
        _ => false,
    }
}

fn argument_matches(required: &TypeRef, advertised: &TypeRef, types: &TypeHierarchy) -> bool {
    match (required, advertised) {
        (TypeRef::Variable { .. }, _) => true,
        (TypeRef::Wildcard { upper, lower }, adv) => match adv {
            TypeRef::Class { .. } | TypeRef::Array(_) => {
                within_bounds(&adv.raw_name(), upper.as_deref(), lower.as_deref(), types)
            }
            TypeRef::Variable { bound, .. } => match (bound, upper) {
                (Some(b), Some(u)) => {
                    types.is_subtype(&b.raw_name(), &u.raw_name())
                        || types.is_subtype(&u.raw_name(), &b.raw_name())
                }
                _ => true,
            },
            TypeRef::Wildcard { .. } => true,
        },
        (req, TypeRef::Variable { bound, .. }) => match bound {
            Some(b) => types.is_subtype(&req.raw_name(), &b.raw_name()),
            None => true,
        },
        (TypeRef::Class { name: rn, args: ra }, TypeRef::Class { name: an, args: aa }) => {
            if rn != an {
                return false;
            }
            if ra.is_empty() || aa.is_empty() {
                return true;
            }
            ra.len() == aa.len() && ra.iter().zip(aa).all(|(r, a)| argument_matches(r, a, types))
        }
        (TypeRef::Array(r), TypeRef::Array(a)) => argument_matches(r, a, types),
        _ => false,
    }
}

fn within_bounds(
    candidate: &str,
    upper: Option<&TypeRef>,
    lower: Option<&TypeRef>,
    types: &TypeHierarchy,
) -> bool {
    let upper_ok = upper.map_or(true, |u| types.is_subtype(candidate, &u.raw_name()));
    let lower_ok = lower.map_or(true, |l| types.is_subtype(&l.raw_name(), candidate));
    upper_ok && lower_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> TypeHierarchy {
        let mut types = TypeHierarchy::new();
        types.declare("Circle", vec!["Shape".to_string()]);
        types.declare("Shape", vec!["Drawable".to_string()]);
        types
    }

    fn t(text: &str) -> TypeRef {
        TypeRef::parse(text).unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let ty = t("Map<String, ? extends Shape>");
        assert_eq!(ty.to_string(), "Map<String, ? extends Shape>");
        assert_eq!(ty.raw_name(), "Map");
        assert_eq!(t("Foo[][]").to_string(), "Foo[][]");
        assert_eq!(t("List<? super Circle>").to_string(), "List<? super Circle>");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(TypeRef::parse("").is_err());
        assert!(TypeRef::parse("List<String").is_err());
        assert!(TypeRef::parse("List<>").is_err());
        assert!(TypeRef::parse("Foo Bar").is_err());
    }

    #[test]
    fn test_raw_matches_any_parameterization() {
        let types = TypeHierarchy::new();
        assert!(contract_matches(&t("List"), &t("List<String>"), &types));
        assert!(contract_matches(&t("List<String>"), &t("List"), &types));
        assert!(!contract_matches(&t("List"), &t("Set<String>"), &types));
    }

    #[test]
    fn test_parameterized_arguments_are_invariant() {
        let types = hierarchy();
        assert!(contract_matches(&t("List<Circle>"), &t("List<Circle>"), &types));
        assert!(!contract_matches(&t("List<Shape>"), &t("List<Circle>"), &types));
    }

    #[test]
    fn test_bounded_wildcards() {
        let types = hierarchy();
        assert!(contract_matches(&t("List<? extends Shape>"), &t("List<Circle>"), &types));
        assert!(contract_matches(&t("List<? extends Drawable>"), &t("List<Circle>"), &types));
        assert!(!contract_matches(&t("List<? extends Circle>"), &t("List<Shape>"), &types));
        assert!(contract_matches(&t("List<? super Circle>"), &t("List<Shape>"), &types));
        assert!(!contract_matches(&t("List<? super Shape>"), &t("List<Circle>"), &types));
    }

    #[test]
    fn test_descriptor_type_variables() {
        let types = hierarchy();
        let advertised = t("Repository<T>").bind_variables(&["T".into()]);
        assert!(advertised.args()[0].is_variable());
        assert!(contract_matches(&t("Repository<User>"), &advertised, &types));

        let bounded = TypeRef::parameterized(
            "Renderer",
            vec![TypeRef::bounded_var("S", t("Shape"))],
        );
        assert!(contract_matches(&t("Renderer<Circle>"), &bounded, &types));
        assert!(!contract_matches(&t("Renderer<String>"), &bounded, &types));
    }

    #[test]
    fn test_request_issues() {
        assert!(t("?").request_issues().is_some());
        assert!(TypeRef::var("T").request_issues().is_some());
        assert!(t("List<? extends Shape>").request_issues().is_none());
        let both = TypeRef::parameterized(
            "List",
            vec![TypeRef::Wildcard {
                upper: Some(Box::new(t("Shape"))),
                lower: Some(Box::new(t("Circle"))),
            }],
        );
        assert!(both.request_issues().is_some());
    }

    #[test]
    fn test_hierarchy_is_transitive() {
        let types = hierarchy();
        assert!(types.is_subtype("Circle", "Drawable"));
        assert!(types.is_subtype("Circle", OBJECT));
        assert!(!types.is_subtype("Drawable", "Circle"));
    }
}
