//! Value model: the member metadata expressions are resolved against.
//!
//! Member and overload resolution never inspect host objects directly. They go through a
//! [`ValueModel`], which lists the fields, methods and constructors of a type and hands back member
//! descriptors carrying their own invokers. [`TypeRegistry`] is the registered-schema
//! implementation: applications describe their classes with [`ClassBuilder`] and register them
//! next to the builtin `Object`/`String`/boxed-number/`Math` classes.
use crate::error::{EvalError, EvalResult};
use crate::types::{Primitive, Type};
use crate::value::Value;
use ahash::{AHashMap, AHashSet};
use std::fmt;
use std::sync::Arc;

pub type FieldGetter = Arc<dyn Fn(Option<&Value>) -> EvalResult<Value> + Send + Sync>;
pub type MethodInvoker = Arc<dyn Fn(Option<&Value>, &[Value]) -> EvalResult<Value> + Send + Sync>;
pub type ConstructorInvoker = Arc<dyn Fn(&[Value]) -> EvalResult<Value> + Send + Sync>;

#[derive(Clone)]
pub struct FieldInfo {
    pub owner: Arc<str>,
    pub name: Arc<str>,
    pub ty: Type,
    pub is_static: bool,
    getter: FieldGetter,
}

impl FieldInfo {
    pub fn new(
        owner: &str,
        name: &str,
        ty: Type,
        is_static: bool,
        getter: impl Fn(Option<&Value>) -> EvalResult<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            owner: Arc::from(owner),
            name: Arc::from(name),
            ty,
            is_static,
            getter: Arc::new(getter),
        }
    }

    pub fn get(&self, target: Option<&Value>) -> EvalResult<Value> {
        (self.getter)(target)
    }

    fn with_type(&self, ty: Type) -> Self {
        Self {
            ty,
            ..self.clone()
        }
    }
}

impl PartialEq for FieldInfo {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.name == other.name && self.is_static == other.is_static
    }
}

impl fmt::Debug for FieldInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}", self.ty, self.owner, self.name)
    }
}

#[derive(Clone)]
pub struct MethodInfo {
    pub owner: Arc<str>,
    pub name: Arc<str>,
    pub params: Vec<Type>,
    pub return_type: Type,
    /// Type variables declared by the method itself.
    pub type_params: Vec<Arc<str>>,
    pub is_static: bool,
    pub varargs: bool,
    invoker: MethodInvoker,
}

impl MethodInfo {
    pub fn invoke(&self, target: Option<&Value>, args: &[Value]) -> EvalResult<Value> {
        (self.invoker)(target, args)
    }

    fn with_signature(&self, params: Vec<Type>, return_type: Type) -> Self {
        Self {
            params,
            return_type,
            ..self.clone()
        }
    }
}

impl PartialEq for MethodInfo {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner
            && self.name == other.name
            && self.params == other.params
            && self.is_static == other.is_static
    }
}

impl fmt::Debug for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for MethodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.owner, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match (self.varargs && i + 1 == self.params.len(), param.component()) {
                (true, Some(component)) => write!(f, "{component}...")?,
                _ => write!(f, "{param}")?,
            }
        }
        f.write_str(")")
    }
}

#[derive(Clone)]
pub struct ConstructorInfo {
    pub owner: Arc<str>,
    pub params: Vec<Type>,
    pub varargs: bool,
    invoker: ConstructorInvoker,
}

impl ConstructorInfo {
    pub fn invoke(&self, args: &[Value]) -> EvalResult<Value> {
        (self.invoker)(args)
    }

    fn with_params(&self, params: Vec<Type>) -> Self {
        Self {
            params,
            ..self.clone()
        }
    }
}

impl PartialEq for ConstructorInfo {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.params == other.params
    }
}

impl fmt::Debug for ConstructorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for ConstructorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "new {}(", self.owner)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

/// Declared shape of a class or interface.
#[derive(Clone, Debug)]
pub struct ClassInfo {
    pub name: Arc<str>,
    pub type_params: Vec<Arc<str>>,
    /// Direct superclass; `None` means `Object` (or nothing, for `Object` itself).
    pub superclass: Option<Type>,
    pub interfaces: Vec<Type>,
    pub is_interface: bool,
    pub is_final: bool,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub constructors: Vec<ConstructorInfo>,
}

impl ClassInfo {
    /// The declared supertypes, `Object` included for classes that name no superclass.
    pub fn direct_supertypes(&self) -> Vec<Type> {
        let mut out = Vec::with_capacity(self.interfaces.len() + 1);
        match &self.superclass {
            Some(superclass) => out.push(superclass.clone()),
            None if &*self.name != "Object" && !self.is_interface => out.push(Type::object()),
            None => {}
        }
        out.extend(self.interfaces.iter().cloned());
        out
    }
}

/// Member metadata for the types expressions can mention.
pub trait ValueModel: Send + Sync {
    fn class(&self, name: &str) -> Option<Arc<ClassInfo>>;

    /// Resolves a (possibly dotted) type name to a type.
    fn lookup_type(&self, name: &str) -> Option<Type>;

    /// Fields visible on `ty`, most derived first, with class type arguments substituted.
    fn list_fields(&self, ty: &Type) -> Vec<FieldInfo>;

    /// Methods named `name` visible on `ty`, most derived first, overridden signatures removed.
    fn list_methods(&self, ty: &Type, name: &str) -> Vec<MethodInfo>;

    fn list_constructors(&self, ty: &Type) -> Vec<ConstructorInfo>;
}

/// Visits `ty` and each of its supertypes once, as instantiated types (`ArrayList<String>` visits
/// `List<String>` and `Collection<String>`), most derived first, ending with `Object`.
pub fn walk_supertypes(
    model: &dyn ValueModel,
    ty: &Type,
    visit: &mut dyn FnMut(&Arc<ClassInfo>, &Type) -> bool,
) {
    let start = match ty {
        Type::Primitive(p) => Type::boxed(*p),
        Type::Array(_) | Type::Null | Type::Var(_) => Type::object(),
        other => other.clone(),
    };
    let mut seen: AHashSet<Arc<str>> = AHashSet::new();
    let mut queue = std::collections::VecDeque::from([start]);
    let mut object_visited = false;
    while let Some(current) = queue.pop_front() {
        let Type::Class { name, args } = &current else {
            continue;
        };
        if !seen.insert(name.clone()) {
            continue;
        }
        let Some(class) = model.class(name) else {
            continue;
        };
        object_visited |= &**name == "Object";
        if !visit(&class, &current) {
            return;
        }
        let bindings = type_bindings(&class, args);
        for supertype in class.direct_supertypes() {
            queue.push_back(supertype.substitute(&|var| bindings.get(var).cloned()));
        }
    }
    // Interfaces implicitly expose `Object`'s members.
    if !object_visited {
        if let Some(object) = model.class("Object") {
            visit(&object, &Type::object());
        }
    }
}

fn type_bindings(class: &ClassInfo, args: &[Type]) -> AHashMap<String, Type> {
    class
        .type_params
        .iter()
        .enumerate()
        .map(|(i, param)| {
            let bound = args.get(i).cloned().unwrap_or_else(Type::object);
            (param.to_string(), bound)
        })
        .collect()
}

/// Views `ty` as its supertype named `class_name`, with type arguments carried through.
pub fn supertype_as(model: &dyn ValueModel, ty: &Type, class_name: &str) -> Option<Type> {
    if class_name == "Object" && ty.is_reference() && *ty != Type::Void {
        return Some(Type::object());
    }
    let mut found = None;
    walk_supertypes(model, ty, &mut |class, instantiated| {
        if &*class.name == class_name {
            found = Some(instantiated.clone());
            false
        } else {
            true
        }
    });
    found
}

/// Superclass hops from `sub` up to `sup` along the class chain only, if `sup` is on it.
pub fn superclass_hops(model: &dyn ValueModel, sub: &str, sup: &str) -> Option<usize> {
    let mut current: Arc<str> = Arc::from(sub);
    let mut hops = 0;
    loop {
        if *current == *sup {
            return Some(hops);
        }
        let class = model.class(&current)?;
        if class.is_interface {
            return None;
        }
        current = match &class.superclass {
            Some(Type::Class { name, .. }) => name.clone(),
            Some(_) => return None,
            None if &*class.name != "Object" => Arc::from("Object"),
            None => return None,
        };
        hops += 1;
    }
}

/// Shortest interface path length from `sub` to the interface `sup`.
pub fn interface_hops(model: &dyn ValueModel, sub: &str, sup: &str) -> Option<usize> {
    let mut frontier = vec![Arc::<str>::from(sub)];
    let mut seen = AHashSet::new();
    let mut hops = 0;
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for name in frontier {
            if *name == *sup {
                return Some(hops);
            }
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(class) = model.class(&name) {
                for interface in &class.interfaces {
                    if let Some(interface) = interface.class_name() {
                        next.push(Arc::from(interface));
                    }
                }
            }
        }
        frontier = next;
        hops += 1;
    }
    None
}

/// Registered-schema [`ValueModel`].
#[derive(Clone, Default)]
pub struct TypeRegistry {
    classes: AHashMap<Arc<str>, Arc<ClassInfo>>,
}

impl TypeRegistry {
    /// A registry with no classes at all, not even `Object`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding the builtin classes.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        crate::builtins::register_builtins(&mut registry);
        registry
    }

    /// Registers `class`, replacing any class of the same name.
    pub fn register(&mut self, class: ClassInfo) -> &mut Self {
        self.classes.insert(class.name.clone(), Arc::new(class));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(|name| &**name)
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.class_names().collect();
        names.sort_unstable();
        f.debug_struct("TypeRegistry").field("classes", &names).finish()
    }
}

impl ValueModel for TypeRegistry {
    fn class(&self, name: &str) -> Option<Arc<ClassInfo>> {
        self.classes.get(name).cloned()
    }

    fn lookup_type(&self, name: &str) -> Option<Type> {
        if let Some(p) = Primitive::from_name(name) {
            return Some(Type::Primitive(p));
        }
        if self.classes.contains_key(name) {
            return Some(Type::class(name));
        }
        // `java.lang.String` style qualified names resolve by their simple name.
        let simple = name.rsplit('.').next()?;
        (simple != name && self.classes.contains_key(simple)).then(|| Type::class(simple))
    }

    fn list_fields(&self, ty: &Type) -> Vec<FieldInfo> {
        let mut out: Vec<FieldInfo> = Vec::new();
        walk_supertypes(self, ty, &mut |class, instantiated| {
            let bindings = type_bindings(class, instantiated.type_args());
            for field in &class.fields {
                if out.iter().all(|f| f.name != field.name) {
                    let ty = field.ty.substitute(&|var| bindings.get(var).cloned());
                    out.push(field.with_type(ty));
                }
            }
            true
        });
        out
    }

    fn list_methods(&self, ty: &Type, name: &str) -> Vec<MethodInfo> {
        let mut out: Vec<MethodInfo> = Vec::new();
        walk_supertypes(self, ty, &mut |class, instantiated| {
            let bindings = type_bindings(class, instantiated.type_args());
            let lookup = |var: &str| bindings.get(var).cloned();
            for method in class.methods.iter().filter(|m| &*m.name == name) {
                let params: Vec<Type> = method.params.iter().map(|p| p.substitute(&lookup)).collect();
                if out.iter().any(|m| m.params == params) {
                    continue;
                }
                let return_type = method.return_type.substitute(&lookup);
                out.push(method.with_signature(params, return_type));
            }
            true
        });
        out
    }

    fn list_constructors(&self, ty: &Type) -> Vec<ConstructorInfo> {
        let Some(class) = ty.class_name().and_then(|name| self.class(name)) else {
            return Vec::new();
        };
        let bindings = type_bindings(&class, ty.type_args());
        let lookup = |var: &str| bindings.get(var).cloned();
        class
            .constructors
            .iter()
            .map(|c| c.with_params(c.params.iter().map(|p| p.substitute(&lookup)).collect()))
            .collect()
    }
}

/// Describes a class for a [`TypeRegistry`].
pub struct ClassBuilder {
    info: ClassInfo,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            info: ClassInfo {
                name: Arc::from(name),
                type_params: Vec::new(),
                superclass: None,
                interfaces: Vec::new(),
                is_interface: false,
                is_final: false,
                fields: Vec::new(),
                methods: Vec::new(),
                constructors: Vec::new(),
            },
        }
    }

    pub fn interface(name: &str) -> Self {
        let mut builder = Self::new(name);
        builder.info.is_interface = true;
        builder
    }

    pub fn type_params(mut self, params: &[&str]) -> Self {
        self.info.type_params = params.iter().map(|p| Arc::from(*p)).collect();
        self
    }

    pub fn extends(mut self, superclass: Type) -> Self {
        self.info.superclass = Some(superclass);
        self
    }

    pub fn implements(mut self, interface: Type) -> Self {
        self.info.interfaces.push(interface);
        self
    }

    pub fn final_class(mut self) -> Self {
        self.info.is_final = true;
        self
    }

    pub fn field(
        mut self,
        name: &str,
        ty: Type,
        getter: impl Fn(&Value) -> EvalResult<Value> + Send + Sync + 'static,
    ) -> Self {
        let owner = self.info.name.clone();
        let context_owner = owner.clone();
        let field_name = name.to_string();
        self.info.fields.push(FieldInfo::new(
            &owner,
            name,
            ty,
            false,
            move |target| match target {
                Some(target) => getter(target),
                None => Err(EvalError::NullDereference {
                    context: format!("{context_owner}.{field_name}"),
                }),
            },
        ));
        self
    }

    pub fn static_field(mut self, name: &str, ty: Type, value: Value) -> Self {
        let owner = self.info.name.clone();
        self.info
            .fields
            .push(FieldInfo::new(&owner, name, ty, true, move |_| Ok(value.clone())));
        self
    }

    pub fn method(
        self,
        name: &str,
        params: Vec<Type>,
        return_type: Type,
        body: impl Fn(&Value, &[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    ) -> Self {
        let context = format!("{}.{name}", self.info.name);
        self.push_method(name, params, return_type, &[], false, false, move |target, args| {
            match target {
                Some(target) => body(target, args),
                None => Err(EvalError::NullDereference {
                    context: context.clone(),
                }),
            }
        })
    }

    /// A method with its own type variables, e.g. `<T> T first(List<T>)`.
    pub fn generic_method(
        self,
        name: &str,
        type_params: &[&str],
        params: Vec<Type>,
        return_type: Type,
        body: impl Fn(&Value, &[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    ) -> Self {
        let context = format!("{}.{name}", self.info.name);
        self.push_method(
            name,
            params,
            return_type,
            type_params,
            false,
            false,
            move |target, args| match target {
                Some(target) => body(target, args),
                None => Err(EvalError::NullDereference {
                    context: context.clone(),
                }),
            },
        )
    }

    pub fn static_method(
        self,
        name: &str,
        params: Vec<Type>,
        return_type: Type,
        body: impl Fn(&[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.push_method(name, params, return_type, &[], true, false, move |_, args| {
            body(args)
        })
    }

    /// A static method whose last parameter (an array type) collects trailing arguments.
    pub fn static_varargs_method(
        self,
        name: &str,
        params: Vec<Type>,
        return_type: Type,
        body: impl Fn(&[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.push_method(name, params, return_type, &[], true, true, move |_, args| {
            body(args)
        })
    }

    pub fn constructor(
        mut self,
        params: Vec<Type>,
        body: impl Fn(&[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.info.constructors.push(ConstructorInfo {
            owner: self.info.name.clone(),
            params,
            varargs: false,
            invoker: Arc::new(body),
        });
        self
    }

    #[allow(clippy::too_many_arguments)]
    fn push_method(
        mut self,
        name: &str,
        params: Vec<Type>,
        return_type: Type,
        type_params: &[&str],
        is_static: bool,
        varargs: bool,
        invoker: impl Fn(Option<&Value>, &[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.info.methods.push(MethodInfo {
            owner: self.info.name.clone(),
            name: Arc::from(name),
            params,
            return_type,
            type_params: type_params.iter().map(|p| Arc::from(*p)).collect(),
            is_static,
            varargs,
            invoker: Arc::new(invoker),
        });
        self
    }

    pub fn build(self) -> ClassInfo {
        self.info
    }
}

/// The synthetic `length` field of array types.
pub(crate) fn array_length_field() -> FieldInfo {
    FieldInfo::new("Array", "length", Type::int(), false, |target| match target {
        Some(Value::Array(array)) => Ok(Value::Int(array.len() as i32)),
        Some(other) => Err(EvalError::mismatch("array", other.runtime_type())),
        None => Err(EvalError::NullDereference {
            context: "array.length".to_string(),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supertypes_carry_type_arguments() {
        let mut registry = TypeRegistry::new();
        registry
            .register(
                ClassBuilder::interface("Box")
                    .type_params(&["T"])
                    .method("get", vec![], Type::var("T"), |_, _| Ok(Value::Null))
                    .build(),
            )
            .register(
                ClassBuilder::new("StringBox")
                    .implements(Type::generic("Box", vec![Type::string()]))
                    .build(),
            );
        let view = supertype_as(&registry, &Type::class("StringBox"), "Box");
        assert_eq!(view, Some(Type::generic("Box", vec![Type::string()])));

        let methods = registry.list_methods(&Type::class("StringBox"), "get");
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].return_type, Type::string());
    }

    #[test]
    fn superclass_hops_count_the_chain() {
        let registry = TypeRegistry::new();
        assert_eq!(superclass_hops(&registry, "Integer", "Number"), Some(1));
        assert_eq!(superclass_hops(&registry, "Integer", "Object"), Some(2));
        assert_eq!(superclass_hops(&registry, "Integer", "String"), None);
    }

    #[test]
    fn qualified_names_resolve_by_simple_name() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.lookup_type("java.lang.String"), Some(Type::string()));
        assert_eq!(registry.lookup_type("long"), Some(Type::long()));
        assert_eq!(registry.lookup_type("Nope"), None);
    }
}
