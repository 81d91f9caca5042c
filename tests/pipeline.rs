//! End-to-end pipeline runs over image files.

use std::path::Path;

use dotmend::{
    assembly::{InstructionAssembler, OpCode},
    deobfuscation::{
        Pipeline, PipelineConfig, PipelineState, Stage, StageContext, StageRegistry,
    },
    file::{ImageFormat, ModuleFormat, WriterOptions},
    metadata::{
        method::MethodDef,
        module::Module,
        token::Token,
        typesystem::{CustomAttribute, TypeDef},
    },
    Error, Result,
};

fn sample_module() -> Result<Module> {
    let mut compute = InstructionAssembler::new();
    compute
        .nop()?
        .ldc_i4(100)?
        .ldc_i4(4)?
        .div()?
        .stloc(0)?
        .ldloc(0)?
        .brtrue("done")?
        .nop()?
        .label("done")?
        .ret()?;

    let mut awake = InstructionAssembler::new();
    awake.ldc_i4(2)?.ldc_i4(3)?.mul()?.pop()?.ret()?;

    let mut serialized = InstructionAssembler::new();
    serialized.ldc_i4(1)?.ldc_i4(1)?.add()?.pop()?.ret()?;

    let mut ty = TypeDef::new(Token(0x02000002), "Game", "Scoreboard");
    ty.methods
        .push(MethodDef::new(Token(0x06000001), "Compute").with_body(compute.finish()?));
    ty.methods
        .push(MethodDef::new(Token(0x06000002), "Awake").with_body(awake.finish()?));
    let mut save = MethodDef::new(Token(0x06000003), "Persist").with_body(serialized.finish()?);
    save.custom_attributes
        .push(CustomAttribute::new("UnityEngine.SerializeField"));
    ty.methods.push(save);

    let mut module = Module::new("Game.dll");
    module.types.push(ty);
    Ok(module)
}

fn write_sample(dir: &Path) -> Result<std::path::PathBuf> {
    let path = dir.join("Game.json");
    ImageFormat::new().save(&sample_module()?, &path, &WriterOptions::default())?;
    Ok(path)
}

fn full_pipeline() -> Result<Pipeline> {
    let config = PipelineConfig::default().with_stages("full").with_seed(1);
    Pipeline::from_config(Box::new(ImageFormat::new()), &StageRegistry::default(), config)
}

#[test]
fn test_full_selection_end_to_end() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = write_sample(dir.path())?;

    let mut pipeline = full_pipeline()?;
    let report = pipeline.run(&input, None)?;
    assert_eq!(report.stages_run, vec!["rename", "fold", "nops"]);
    assert!(report.stage_failures.is_empty());

    let module = ImageFormat::new().load(&dir.path().join("Game_obf.json"))?;
    let ty = &module.types[0];
    assert_ne!(ty.name, "Scoreboard");

    let compute = &ty.methods[0];
    assert_ne!(compute.name, "Compute");
    let body = compute.body.as_ref().unwrap();
    assert_eq!(body.at(0).unwrap().i4_value(), Some(25));
    assert!(body.instructions().all(|instr| !instr.is_nop()));
    assert_eq!(body.at(3).unwrap().targets(), vec![body.last().unwrap()]);

    let awake = &ty.methods[1];
    assert_eq!(awake.name, "Awake");
    assert_eq!(awake.body.as_ref().unwrap().at(2).unwrap().opcode, OpCode::Mul);

    let persist = &ty.methods[2];
    assert_eq!(persist.name, "Persist");
    assert_eq!(persist.body.as_ref().unwrap().len(), 5);
    Ok(())
}

#[test]
fn test_save_failure_leaves_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = write_sample(dir.path())?;
    let output = dir.path().join("missing").join("Game.json");

    let mut pipeline = full_pipeline()?;
    let result = pipeline.run(&input, Some(&output));

    assert!(matches!(result, Err(Error::Save { .. })));
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(!output.exists());
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
    Ok(())
}

struct Sabotage;

impl Stage for Sabotage {
    fn name(&self) -> &'static str {
        "sabotage"
    }

    fn apply(&self, ctx: &mut StageContext) -> Result<()> {
        for ty in &mut ctx.module.types {
            for body in ty.methods.iter_mut().filter_map(|method| method.body.as_mut()) {
                if let Some(last) = body.last() {
                    body.remove(last);
                }
            }
        }
        Err(Error::stage("sabotage", "left the module half rewritten"))
    }
}

#[test]
fn test_custom_stage_damage_is_repaired() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = write_sample(dir.path())?;
    let output = dir.path().join("out.json");

    let mut registry = StageRegistry::default();
    registry.register("sabotage", || -> Box<dyn Stage> { Box::new(Sabotage) });
    let config = PipelineConfig::default().with_stages("sabotage,nops");
    let mut pipeline = Pipeline::from_config(Box::new(ImageFormat::new()), &registry, config)?;

    let report = pipeline.run(&input, Some(&output))?;
    assert_eq!(report.stages_run, vec!["nops"]);
    assert_eq!(report.stage_failures[0].stage, "sabotage");
    assert_eq!(report.repair.methods_repaired, 3);
    assert!(report.repair.totals.appended_returns >= 3);

    let module = ImageFormat::new().load(&output)?;
    for (_, method) in module.methods() {
        assert!(method.body.as_ref().unwrap().ends_with_terminator());
    }
    Ok(())
}
