use std::collections::HashMap;

use log::{debug, info};

use crate::{
    deobfuscation::{
        classifier::{is_entry_point_type, is_framework_type},
        context::StageContext,
        pass::Stage,
    },
    metadata::{
        module::Module,
        typesystem::{TypeAttributes, TypeDef, TypeSig},
    },
    Result,
};

/// Name of the pseudo-type holding global members.
const MODULE_TYPE: &str = "<Module>";

/// Replaces identifiers with generated names.
///
/// Every name already present in the module is reserved first, so generated names never
/// collide with surviving ones. Types keep their namespace; references to a renamed type by full
/// name (base types, signatures, attribute types) are rewritten. Methods are renamed only when
/// the classifier deems them eligible, and their parameters follow.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenameStage;

impl RenameStage {
    /// Selection name.
    pub const NAME: &'static str = "rename";

    /// Boxed constructor for the stage registry.
    #[must_use]
    pub fn boxed() -> Box<dyn Stage> {
        Box::new(RenameStage)
    }
}

impl Stage for RenameStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Renames eligible types, methods and parameters"
    }

    fn apply(&self, ctx: &mut StageContext) -> Result<()> {
        reserve_existing(ctx);

        let type_targets: Vec<usize> = ctx
            .module
            .types
            .iter()
            .enumerate()
            .filter(|(_, ty)| type_renamable(ty, &ctx.module))
            .map(|(index, _)| index)
            .collect();

        let method_targets: Vec<_> = ctx
            .module
            .method_locations()
            .into_iter()
            .filter(|location| {
                ctx.module.at(*location).is_some_and(|(ty, method)| {
                    !is_framework_type(ty)
                        && ctx.classifier.method_eligible(method, ty, &ctx.module)
                })
            })
            .collect();

        let mut renamed_types = HashMap::new();
        for index in type_targets {
            let name = ctx.names.generate();
            let ty = &mut ctx.module.types[index];
            let old = ty.full_name();
            ty.name = name;
            debug!("Renamed type {old} -> {}", ty.full_name());
            renamed_types.insert(old, ty.full_name());
        }

        let mut renamed_params = 0;
        for location in &method_targets {
            let name = ctx.names.generate();
            let Some((_, method)) = ctx.module.at(*location) else {
                continue;
            };
            let param_count = method.params.len();
            let param_names: Vec<String> = (0..param_count).map(|_| ctx.names.generate()).collect();
            if let Some(method) = ctx.module.method_at_mut(*location) {
                debug!("Renamed method {} -> {name}", method.name);
                method.name = name;
                for (param, name) in method.params.iter_mut().zip(param_names) {
                    param.name = name;
                    renamed_params += 1;
                }
            }
        }

        if !renamed_types.is_empty() {
            rewrite_type_references(&mut ctx.module, &renamed_types);
        }

        info!(
            "Renamed {} type(s), {} method(s) and {renamed_params} parameter(s)",
            renamed_types.len(),
            method_targets.len()
        );
        Ok(())
    }
}

fn reserve_existing(ctx: &mut StageContext) {
    for ty in &ctx.module.types {
        ctx.names.reserve(ty.name.as_str());
        for method in &ty.methods {
            ctx.names.reserve(method.name.as_str());
            for param in &method.params {
                ctx.names.reserve(param.name.as_str());
            }
        }
    }
}

fn type_renamable(ty: &TypeDef, module: &Module) -> bool {
    if ty.name == MODULE_TYPE || ty.name.starts_with('<') {
        return false;
    }
    if ty
        .flags
        .intersects(TypeAttributes::SPECIAL_NAME | TypeAttributes::RTSPECIAL_NAME)
    {
        return false;
    }

    !is_framework_type(ty) && !is_entry_point_type(ty, module)
}

fn rewrite_type_references(module: &mut Module, renamed: &HashMap<String, String>) {
    for ty in &mut module.types {
        if let Some(base) = ty.base_type.as_mut() {
            if let Some(new) = renamed.get(base.as_str()) {
                base.clone_from(new);
            }
        }
        for attribute in &mut ty.custom_attributes {
            if let Some(new) = renamed.get(attribute.type_name.as_str()) {
                attribute.type_name.clone_from(new);
            }
        }

        for method in &mut ty.methods {
            rewrite_sig(&mut method.return_type, renamed);
            for param in &mut method.params {
                rewrite_sig(&mut param.sig, renamed);
            }
            for attribute in &mut method.custom_attributes {
                if let Some(new) = renamed.get(attribute.type_name.as_str()) {
                    attribute.type_name.clone_from(new);
                }
            }
            if let Some(body) = method.body.as_mut() {
                for local in &mut body.locals {
                    rewrite_sig(&mut local.sig, renamed);
                }
            }
        }
    }
}

fn rewrite_sig(sig: &mut TypeSig, renamed: &HashMap<String, String>) {
    match sig {
        TypeSig::Named(name) => {
            if let Some(new) = renamed.get(name.as_str()) {
                name.clone_from(new);
            }
        }
        TypeSig::SzArray(element) => rewrite_sig(element, renamed),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InstructionAssembler,
        deobfuscation::config::PipelineConfig,
        metadata::{
            method::{Local, MethodAccessFlags, MethodDef, MethodModifiers, Param},
            token::Token,
        },
    };

    fn body() -> crate::metadata::method::MethodBody {
        let mut asm = InstructionAssembler::new();
        asm.ret().unwrap();
        asm.finish().unwrap()
    }

    fn module() -> Module {
        let mut player = TypeDef::new(Token(0x02000002), "Game", "Player");
        player.base_type = Some("UnityEngine.MonoBehaviour".to_string());
        player
            .methods
            .push(MethodDef::new(Token(0x06000001), "Update").with_body(body()));

        let mut helper = TypeDef::new(Token(0x02000003), "Game", "Helper");
        let mut compute = MethodDef::new(Token(0x06000002), "Compute").with_body(body());
        compute.params.push(Param::new("amount", TypeSig::I4));
        compute
            .params
            .push(Param::new("other", TypeSig::Named("Game.Helper".to_string())));
        helper.methods.push(compute);
        let mut virt = MethodDef::new(Token(0x06000003), "Describe").with_body(body());
        virt.modifiers = MethodModifiers::VIRTUAL;
        helper.methods.push(virt);

        let mut derived = TypeDef::new(Token(0x02000004), "Game", "FastHelper");
        derived.base_type = Some("Game.Helper".to_string());
        let mut uses = MethodDef::new(Token(0x06000004), "Use").with_body(body());
        uses.access = MethodAccessFlags::PUBLIC;
        if let Some(body) = uses.body.as_mut() {
            body.locals.push(Local::new(TypeSig::SzArray(Box::new(TypeSig::Named(
                "Game.Helper".to_string(),
            )))));
        }
        derived.methods.push(uses);

        let mut module = Module::new("Game.dll");
        module.types.push(TypeDef::new(Token(0x02000001), "", "<Module>"));
        module.types.push(player);
        module.types.push(helper);
        module.types.push(derived);
        module
    }

    #[test]
    fn test_rename_respects_classifier() -> Result<()> {
        let mut ctx = StageContext::new(module(), &PipelineConfig::default().with_seed(3));
        RenameStage.apply(&mut ctx)?;
        let module = ctx.into_module();

        assert_eq!(module.types[0].name, "<Module>");
        assert_eq!(module.types[1].name, "Player");
        assert_eq!(module.types[1].methods[0].name, "Update");

        let helper = &module.types[2];
        assert_ne!(helper.name, "Helper");
        assert_eq!(helper.namespace, "Game");
        assert_ne!(helper.methods[0].name, "Compute");
        assert_ne!(helper.methods[0].params[0].name, "amount");
        assert_eq!(helper.methods[1].name, "Describe");

        assert_ne!(module.types[3].methods[0].name, "Use");
        Ok(())
    }

    #[test]
    fn test_type_references_follow_rename() -> Result<()> {
        let mut ctx = StageContext::new(module(), &PipelineConfig::default().with_seed(5));
        RenameStage.apply(&mut ctx)?;
        let module = ctx.into_module();

        let helper = module.types[2].full_name();
        assert_eq!(module.types[3].base_type.as_deref(), Some(helper.as_str()));
        assert_eq!(
            module.types[2].methods[0].params[1].sig,
            TypeSig::Named(helper.clone())
        );
        let local = &module.types[3].methods[0].body.as_ref().unwrap().locals[0];
        assert_eq!(local.sig.full_name(), format!("{helper}[]"));
        Ok(())
    }

    #[test]
    fn test_generated_names_are_unique() -> Result<()> {
        let mut ctx = StageContext::new(module(), &PipelineConfig::default().with_seed(9));
        RenameStage.apply(&mut ctx)?;
        let module = ctx.into_module();

        let mut seen = std::collections::HashSet::new();
        for ty in &module.types {
            assert!(seen.insert(ty.name.clone()));
            for method in &ty.methods {
                assert!(seen.insert(method.name.clone()));
            }
        }
        Ok(())
    }
}
