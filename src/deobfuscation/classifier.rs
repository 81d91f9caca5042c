//! Mutation safety predicates.
//!
//! Every predicate here is total: it never fails and resolves every ambiguous case to the
//! conservative answer (exclude from mutation, or treat as externally visible). Stages consult
//! them before touching a method or a literal.
//!
//! Thresholds live in [`ClassifierConfig`]; the free functions use its defaults.

use crate::{
    assembly::{InstrId, OpCode},
    metadata::{
        method::{MethodBody, MethodDef},
        module::{MethodLocation, Module},
        typesystem::{TypeDef, TypeSig},
    },
};

/// Method names the Unity runtime invokes by reflection, outside any visible call graph.
pub const LIFECYCLE_CALLBACKS: &[&str] = &[
    "Start",
    "Update",
    "LateUpdate",
    "FixedUpdate",
    "Awake",
    "OnEnable",
    "OnDisable",
    "OnDestroy",
    "OnGUI",
    "OnCollisionEnter",
    "OnCollisionExit",
    "OnTriggerEnter",
    "OnTriggerExit",
    "OnMouseDown",
    "OnMouseUp",
    "OnMouseEnter",
    "OnMouseExit",
    "OnMouseOver",
    "OnMouseDrag",
    "OnBecameVisible",
    "OnBecameInvisible",
    "OnPreRender",
    "OnPostRender",
    "OnRenderObject",
    "OnWillRenderObject",
    "OnDrawGizmos",
    "OnDrawGizmosSelected",
    "OnApplicationFocus",
    "OnApplicationPause",
    "OnApplicationQuit",
];

/// Attribute fragments marking serialization, native interop or engine-managed invocation.
const PROTECTED_ATTRIBUTES: &[&str] = &["Serialize", "DllImport", "MonoPInvoke", "Unity"];

/// Attribute fragments marking native export.
const EXPORT_ATTRIBUTES: &[&str] = &["DllExport", "UnmanagedExport", "Export"];

/// Type-level COM visibility markers.
const COM_TYPE_ATTRIBUTES: &[&str] = &["ComVisible", "Guid", "ClassInterface"];

/// Method-level COM visibility markers.
const COM_METHOD_ATTRIBUTES: &[&str] = &["ComVisible", "DispId"];

const FRAMEWORK_BASE_TYPES: &[&str] = &[
    "UnityEngine.MonoBehaviour",
    "UnityEngine.ScriptableObject",
];

const FRAMEWORK_NAMESPACES: &[&str] = &["UnityEngine.", "UnityEditor.", "System.", "Microsoft."];

/// Thresholds used by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierConfig {
    /// Bodies with more branch instructions than this are complex (default: 8).
    pub branch_limit: usize,
    /// Literals with a larger magnitude are never replaced (default: 10000).
    pub magnitude_limit: u32,
    /// Instructions inspected after a literal for a control-flow consumer (default: 3).
    pub lookahead: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            branch_limit: 8,
            magnitude_limit: 10_000,
            lookahead: 3,
        }
    }
}

impl ClassifierConfig {
    /// Whether `method` may be rewritten at all.
    ///
    /// Excludes compiler-reserved members, constructors, bodyless, abstract and virtual methods,
    /// lifecycle callbacks, bodies with complex control flow, methods carrying a protected
    /// attribute, and entry points.
    #[must_use]
    pub fn method_eligible(&self, method: &MethodDef, ty: &TypeDef, module: &Module) -> bool {
        if method.is_special_name() || method.is_constructor() || !method.has_body() {
            return false;
        }
        if method.is_abstract() || method.is_virtual() {
            return false;
        }
        if is_lifecycle_callback(&method.name) || self.has_complex_control_flow(method) {
            return false;
        }
        if PROTECTED_ATTRIBUTES
            .iter()
            .any(|fragment| method.has_attribute_containing(fragment))
        {
            return false;
        }

        !is_entry_point(method, ty, module)
    }

    /// Whether `method`'s body is too irregular to rewrite safely.
    ///
    /// A bodyless method counts as complex.
    #[must_use]
    pub fn has_complex_control_flow(&self, method: &MethodDef) -> bool {
        let Some(body) = &method.body else {
            return true;
        };

        body.branch_count() > self.branch_limit
            || body.has_switch()
            || !body.exception_handlers.is_empty()
    }

    /// Whether the literal `value` at live position `index` of `body` may be replaced.
    #[must_use]
    pub fn is_constant_replaceable(&self, value: i32, index: usize, body: &MethodBody) -> bool {
        if index >= body.len() {
            return false;
        }
        if matches!(value, -1..=1) || value.unsigned_abs() > self.magnitude_limit {
            return false;
        }
        if self.is_in_control_flow_context(body, index) {
            return false;
        }

        !body
            .at(index + 1)
            .is_some_and(|next| next.opcode.is_array_element_access())
    }

    /// Whether the value produced at `index` feeds a branch, switch or comparison.
    ///
    /// Only the first instruction within the lookahead window that is not a `nop` or `pop`
    /// is inspected.
    #[must_use]
    pub fn is_in_control_flow_context(&self, body: &MethodBody, index: usize) -> bool {
        if index >= body.len() {
            return false;
        }

        (1..=self.lookahead)
            .map_while(|offset| body.at(index + offset))
            .find(|next| !matches!(next.opcode, OpCode::Nop | OpCode::Pop))
            .is_some_and(|consumer| {
                consumer.is_branch() || consumer.is_switch() || consumer.opcode.is_comparison()
            })
    }

    /// Every `ldc.i4` literal of an eligible method that passes
    /// [`ClassifierConfig::is_constant_replaceable`], with its value.
    #[must_use]
    pub fn replaceable_constants(
        &self,
        method: &MethodDef,
        ty: &TypeDef,
        module: &Module,
    ) -> Vec<(InstrId, i32)> {
        let Some(body) = method.body.as_ref() else {
            return Vec::new();
        };
        if !self.method_eligible(method, ty, module) {
            return Vec::new();
        }

        body.iter()
            .enumerate()
            .filter_map(|(index, (id, instruction))| {
                let value = instruction.i4_value()?;
                self.is_constant_replaceable(value, index, body)
                    .then_some((id, value))
            })
            .collect()
    }

    /// Calls `replace` for every replaceable literal of the method at `location`.
    ///
    /// Candidates are collected before the first call, so `replace` may freely rewrite the body.
    /// Returns how many calls reported a replacement.
    pub fn for_each_replaceable_constant<F>(
        &self,
        module: &mut Module,
        location: MethodLocation,
        mut replace: F,
    ) -> usize
    where
        F: FnMut(&mut MethodBody, InstrId, i32) -> bool,
    {
        let candidates = match module.at(location) {
            Some((ty, method)) => self.replaceable_constants(method, ty, module),
            None => return 0,
        };
        let Some(body) = module
            .method_at_mut(location)
            .and_then(|method| method.body.as_mut())
        else {
            return 0;
        };

        candidates
            .into_iter()
            .filter(|(id, value)| replace(body, *id, *value))
            .count()
    }
}

/// [`ClassifierConfig::method_eligible`] with default thresholds.
#[must_use]
pub fn method_eligible(method: &MethodDef, ty: &TypeDef, module: &Module) -> bool {
    ClassifierConfig::default().method_eligible(method, ty, module)
}

/// [`ClassifierConfig::has_complex_control_flow`] with default thresholds.
#[must_use]
pub fn has_complex_control_flow(method: &MethodDef) -> bool {
    ClassifierConfig::default().has_complex_control_flow(method)
}

/// [`ClassifierConfig::is_constant_replaceable`] with default thresholds.
#[must_use]
pub fn is_constant_replaceable(value: i32, index: usize, body: &MethodBody) -> bool {
    ClassifierConfig::default().is_constant_replaceable(value, index, body)
}

/// [`ClassifierConfig::is_in_control_flow_context`] with default thresholds.
#[must_use]
pub fn is_in_control_flow_context(body: &MethodBody, index: usize) -> bool {
    ClassifierConfig::default().is_in_control_flow_context(body, index)
}

/// Whether `method` is part of the module's externally reachable surface.
///
/// True for the declared entry point, a conventional `static Main`, native exports, and public
/// members of COM-visible public types.
#[must_use]
pub fn is_entry_point(method: &MethodDef, ty: &TypeDef, module: &Module) -> bool {
    if module.entry_point == Some(method.token) {
        return true;
    }
    if is_main_signature(method) {
        return true;
    }
    if EXPORT_ATTRIBUTES
        .iter()
        .any(|fragment| method.has_attribute_type_containing(fragment))
    {
        return true;
    }

    if method.is_public() && ty.is_public() {
        let com_type = COM_TYPE_ATTRIBUTES
            .iter()
            .any(|fragment| ty.has_attribute_type_containing(fragment));
        let com_method = COM_METHOD_ATTRIBUTES
            .iter()
            .any(|fragment| method.has_attribute_type_containing(fragment));
        return com_type || com_method;
    }

    false
}

fn is_main_signature(method: &MethodDef) -> bool {
    if method.name != "Main" || !method.is_static() {
        return false;
    }
    if !matches!(method.return_type, TypeSig::Void | TypeSig::I4) {
        return false;
    }

    match method.params.as_slice() {
        [] => true,
        [args] => args.sig.is_string_array(),
        _ => false,
    }
}

/// Whether any method of `ty` is an entry point, or the type itself is exported or COM-visible.
#[must_use]
pub fn is_entry_point_type(ty: &TypeDef, module: &Module) -> bool {
    if ty
        .methods
        .iter()
        .any(|method| is_entry_point(method, ty, module))
    {
        return true;
    }

    COM_TYPE_ATTRIBUTES
        .iter()
        .chain(&["DllExport"])
        .any(|fragment| ty.has_attribute_type_containing(fragment))
}

/// Whether `ty` belongs to a framework or derives from a Unity engine object.
#[must_use]
pub fn is_framework_type(ty: &TypeDef) -> bool {
    if ty
        .base_type
        .as_deref()
        .is_some_and(|base| FRAMEWORK_BASE_TYPES.contains(&base))
    {
        return true;
    }

    let full_name = ty.full_name();
    FRAMEWORK_NAMESPACES
        .iter()
        .any(|namespace| full_name.starts_with(namespace))
}

/// Whether `name` is invoked by the engine by exact name.
#[must_use]
pub fn is_lifecycle_callback(name: &str) -> bool {
    LIFECYCLE_CALLBACKS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InstructionAssembler,
        metadata::{
            method::{MethodAccessFlags, MethodModifiers, Param},
            token::Token,
            typesystem::{CustomAttribute, TypeAttributes},
        },
        Result,
    };

    fn simple_body() -> Result<MethodBody> {
        let mut asm = InstructionAssembler::new();
        asm.ldc_i4(42)?.stloc(0)?.ret()?;
        asm.finish()
    }

    fn fixture(method: MethodDef) -> (Module, TypeDef) {
        let mut ty = TypeDef::new(Token(0x02000002), "Game", "Player");
        ty.methods.push(method);
        let mut module = Module::new("Game.dll");
        module.types.push(ty.clone());
        (module, ty)
    }

    #[test]
    fn test_plain_method_is_eligible() -> Result<()> {
        let method = MethodDef::new(Token(0x06000001), "Helper").with_body(simple_body()?);
        let (module, ty) = fixture(method.clone());
        assert!(method_eligible(&method, &ty, &module));
        Ok(())
    }

    #[test]
    fn test_exclusions() -> Result<()> {
        let base = MethodDef::new(Token(0x06000001), "Helper").with_body(simple_body()?);
        let (module, ty) = fixture(base.clone());

        let mut accessor = base.clone();
        accessor.modifiers |= MethodModifiers::SPECIAL_NAME;
        assert!(!method_eligible(&accessor, &ty, &module));

        let mut ctor = base.clone();
        ctor.name = ".ctor".to_string();
        assert!(!method_eligible(&ctor, &ty, &module));

        let mut bodyless = base.clone();
        bodyless.body = None;
        assert!(!method_eligible(&bodyless, &ty, &module));

        let mut virtual_method = base.clone();
        virtual_method.modifiers |= MethodModifiers::VIRTUAL;
        assert!(!method_eligible(&virtual_method, &ty, &module));

        let mut abstract_method = base.clone();
        abstract_method.modifiers |= MethodModifiers::ABSTRACT;
        assert!(!method_eligible(&abstract_method, &ty, &module));

        for name in LIFECYCLE_CALLBACKS {
            let mut callback = base.clone();
            callback.name = (*name).to_string();
            assert!(!method_eligible(&callback, &ty, &module), "{name}");
        }

        let mut interop = base.clone();
        interop
            .custom_attributes
            .push(CustomAttribute::new("AOT.MonoPInvokeCallbackAttribute"));
        assert!(!method_eligible(&interop, &ty, &module));

        let mut serialized = base;
        serialized
            .custom_attributes
            .push(CustomAttribute::new("UnityEngine.SerializeField"));
        assert!(!method_eligible(&serialized, &ty, &module));
        Ok(())
    }

    #[test]
    fn test_entry_points() -> Result<()> {
        let mut main = MethodDef::new(Token(0x06000001), "Main").with_body(simple_body()?);
        main.modifiers |= MethodModifiers::STATIC;
        main.params.push(Param::new(
            "args",
            TypeSig::SzArray(Box::new(TypeSig::String)),
        ));
        let (module, ty) = fixture(main.clone());
        assert!(is_entry_point(&main, &ty, &module));
        assert!(!method_eligible(&main, &ty, &module));
        assert!(is_entry_point_type(&ty, &module));

        let mut wrong_return = main.clone();
        wrong_return.return_type = TypeSig::String;
        assert!(!is_entry_point(&wrong_return, &ty, &module));

        let mut instance_main = main;
        instance_main.modifiers = MethodModifiers::empty();
        assert!(!is_entry_point(&instance_main, &ty, &module));

        let declared = MethodDef::new(Token(0x06000007), "Boot").with_body(simple_body()?);
        let (mut module, ty) = fixture(declared.clone());
        module.entry_point = Some(Token(0x06000007));
        assert!(is_entry_point(&declared, &ty, &module));
        assert!(!method_eligible(&declared, &ty, &module));

        let mut exported = MethodDef::new(Token(0x06000002), "Init").with_body(simple_body()?);
        exported
            .custom_attributes
            .push(CustomAttribute::new("RGiesecke.DllExport.DllExportAttribute"));
        let (module, ty) = fixture(exported.clone());
        assert!(is_entry_point(&exported, &ty, &module));
        Ok(())
    }

    #[test]
    fn test_export_markers_match_namespace() -> Result<()> {
        let mut bridged = MethodDef::new(Token(0x06000004), "Attach").with_body(simple_body()?);
        bridged
            .custom_attributes
            .push(CustomAttribute::new("NativeExports.Interop.BridgeAttribute"));
        let (module, ty) = fixture(bridged.clone());
        assert!(is_entry_point(&bridged, &ty, &module));
        assert!(!method_eligible(&bridged, &ty, &module));

        let mut marked = TypeDef::new(Token(0x02000003), "Game", "Plugin");
        marked
            .custom_attributes
            .push(CustomAttribute::new("Vendor.DllExportSupport.MarkerAttribute"));
        assert!(is_entry_point_type(&marked, &module));
        Ok(())
    }

    #[test]
    fn test_com_visibility() -> Result<()> {
        let mut method = MethodDef::new(Token(0x06000003), "Invoke").with_body(simple_body()?);
        method.access = MethodAccessFlags::PUBLIC;
        let (module, mut ty) = fixture(method.clone());
        assert!(!is_entry_point(&method, &ty, &module));

        ty.custom_attributes.push(CustomAttribute::new(
            "System.Runtime.InteropServices.GuidAttribute",
        ));
        assert!(!is_entry_point(&method, &ty, &module));

        ty.flags = TypeAttributes::PUBLIC;
        assert!(is_entry_point(&method, &ty, &module));

        let mut plain_type = ty.clone();
        plain_type.custom_attributes.clear();
        let mut dispatched = method;
        dispatched.custom_attributes.push(CustomAttribute::new(
            "System.Runtime.InteropServices.DispIdAttribute",
        ));
        assert!(is_entry_point(&dispatched, &plain_type, &module));
        Ok(())
    }

    #[test]
    fn test_complex_control_flow() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        for _ in 0..9 {
            asm.br("end")?;
        }
        asm.label("end")?.ret()?;
        let branchy = MethodDef::new(Token(0x06000001), "Spin").with_body(asm.finish()?);
        assert!(has_complex_control_flow(&branchy));

        let mut asm = InstructionAssembler::new();
        asm.ldc_i4(0)?.switch(&["end"])?.label("end")?.ret()?;
        let switching = MethodDef::new(Token(0x06000002), "Pick").with_body(asm.finish()?);
        assert!(has_complex_control_flow(&switching));

        let mut asm = InstructionAssembler::new();
        asm.label("try")?
            .nop()?
            .leave("end")?
            .label("handler")?
            .pop()?
            .leave("end")?
            .label("end")?
            .ret()?;
        asm.try_catch("try", "handler", "handler", Some("end"), "System.Exception");
        let guarded = MethodDef::new(Token(0x06000003), "Guard").with_body(asm.finish()?);
        assert!(has_complex_control_flow(&guarded));

        let plain = MethodDef::new(Token(0x06000004), "Plain").with_body(simple_body()?);
        assert!(!has_complex_control_flow(&plain));
        assert!(has_complex_control_flow(&MethodDef::new(Token(0x06000005), "Extern")));

        let relaxed = ClassifierConfig {
            branch_limit: 16,
            ..ClassifierConfig::default()
        };
        assert!(!relaxed.has_complex_control_flow(&branchy));
        Ok(())
    }

    #[test]
    fn test_constant_replaceable() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.ldc_i4(42)?.stloc(0)?.ret()?;
        let body = asm.finish()?;

        assert!(is_constant_replaceable(42, 0, &body));
        for value in [-1, 0, 1, 20000, -10001] {
            assert!(!is_constant_replaceable(value, 0, &body), "{value}");
        }
        assert!(!is_constant_replaceable(42, 3, &body));

        let mut asm = InstructionAssembler::new();
        asm.ldc_i4(42)?.nop()?.brtrue("end")?.label("end")?.ret()?;
        let branching = asm.finish()?;
        assert!(is_in_control_flow_context(&branching, 0));
        assert!(!is_constant_replaceable(42, 0, &branching));

        let mut asm = InstructionAssembler::new();
        asm.ldc_i4(42)?.ldc_i4(7)?.ceq()?.pop()?.ret()?;
        let comparing = asm.finish()?;
        assert!(!is_constant_replaceable(7, 1, &comparing));
        // The consumer of the first literal is another literal, not the comparison.
        assert!(is_constant_replaceable(42, 0, &comparing));

        let mut asm = InstructionAssembler::new();
        asm.ldloc(0)?.ldc_i4(5)?.op(OpCode::LdelemI4)?.pop()?.ret()?;
        let indexing = asm.finish()?;
        assert!(!is_constant_replaceable(5, 1, &indexing));
        Ok(())
    }

    #[test]
    fn test_framework_types() {
        let mut behaviour = TypeDef::new(Token(0x02000002), "Game", "Player");
        assert!(!is_framework_type(&behaviour));
        behaviour.base_type = Some("UnityEngine.MonoBehaviour".to_string());
        assert!(is_framework_type(&behaviour));

        let system = TypeDef::new(Token(0x02000003), "System.Collections", "Helpers");
        assert!(is_framework_type(&system));
        assert!(is_lifecycle_callback("OnGUI"));
        assert!(!is_lifecycle_callback("OnTriggerStay"));
    }

    #[test]
    fn test_for_each_replaceable_constant() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.ldc_i4(42)?.stloc(0)?.ldc_i4(0)?.stloc(1)?.ldc_i4(300)?.stloc(2)?.ret()?;
        let method = MethodDef::new(Token(0x06000001), "Helper").with_body(asm.finish()?);
        let (mut module, _) = fixture(method);
        let location = MethodLocation {
            type_index: 0,
            method_index: 0,
        };

        let mut seen = Vec::new();
        let accepted = ClassifierConfig::default().for_each_replaceable_constant(
            &mut module,
            location,
            |_, _, value| {
                seen.push(value);
                value > 100
            },
        );
        assert_eq!(seen, vec![42, 300]);
        assert_eq!(accepted, 1);
        Ok(())
    }
}
