//! atlas 配准与标签迁移命令行工具.
//!
//! 以 base 路径约定组织输入输出: `<Base>.fcsv` 是地标,
//! `<Base>-bone1.nii.gz` 是第一块骨的体数据, `<Base>-label.nii.gz` 是标签.

use std::error::Error;
use std::process::ExitCode;

use log::info;

use ct_osseo::prelude::*;

fn usage(program: &str) -> String {
    format!(
        "用法: {program} <输入Base> <输出Base> <AtlasBase> [--stop-at-affine]\n\
         \n\
         读取 <Base>.fcsv / <Base>-bone1.nii.gz / <Base>-label.nii.gz,\n\
         输出各阶段变换 (<输出Base>-*.bin) 与重采样标签\n\
         (<输出Base>-A-label.nii.gz, <输出Base>-BS-label.nii.gz)."
    )
}

fn run() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = RegistrationConfig::default();
    let mut positional = Vec::new();
    for a in &args[1..] {
        if a == "--stop-at-affine" {
            config.stop_at_affine = true;
        } else {
            positional.push(a.clone());
        }
    }
    let [input_base, output_base, atlas_base] = positional.as_slice() else {
        return Err(usage(&args[0]).into());
    };

    let timer = StageTimer::new();
    let input_landmarks = read_fcsv(format!("{input_base}.fcsv"))?;
    let atlas_landmarks = read_fcsv(format!("{atlas_base}.fcsv"))?;

    let input_scan = CtScan::open(format!("{input_base}-bone1.nii.gz"))?;
    let input_header = input_scan.header().clone();
    let mut input_bone = input_scan.into_grid();
    let atlas_scan = CtScan::open(format!("{atlas_base}-bone1.nii.gz"))?;
    let atlas_header = atlas_scan.header().clone();
    let mut atlas_bone = atlas_scan.into_grid();

    let input_labels = CtLabel::open(format!("{input_base}-label.nii.gz"))?.into_grid();
    let atlas_labels = CtLabel::open(format!("{atlas_base}-label.nii.gz"))?.into_grid();
    timer.stage("读入体数据与地标");

    let reg = register_atlas(
        &mut input_bone,
        &input_labels,
        &mut atlas_bone,
        &atlas_labels,
        &input_landmarks,
        &atlas_landmarks,
        &config,
        &timer,
    )?;

    // 斜坡化后的体数据, 便于核对配准输入.
    CtScan::from_grid(&input_header, input_bone.clone())
        .save(format!("{output_base}-bone1i.nii.gz"))?;
    CtScan::from_grid(&atlas_header, atlas_bone).save(format!("{output_base}-bone1a.nii.gz"))?;

    save_transform(
        format!("{output_base}-landmarks.bin"),
        &TransformKind::Rigid(reg.landmark),
    )?;
    save_transform(
        format!("{output_base}-rigid.bin"),
        &TransformKind::Rigid(reg.rigid),
    )?;
    save_transform(
        format!("{output_base}-affine.bin"),
        &TransformKind::Affine(reg.affine),
    )?;

    info!("重采样 atlas 标签到输入空间");
    let affine_labels = resample_labels(&atlas_labels, &input_bone, &reg.affine);
    CtLabel::from_grid(&input_header, affine_labels)
        .save(format!("{output_base}-A-label.nii.gz"))?;
    timer.stage("affine 标签重采样");

    if let Some((composite, _)) = &reg.deformable {
        save_transform(
            format!("{output_base}-bspline.bin"),
            &TransformKind::Composite(composite.clone()),
        )?;
        let bs_labels = resample_labels(&atlas_labels, &input_bone, composite);
        CtLabel::from_grid(&input_header, bs_labels)
            .save(format!("{output_base}-BS-label.nii.gz"))?;
        timer.stage("B-spline 标签重采样");
    }
    Ok(())
}

fn main() -> ExitCode {
    simple_logger::init_with_level(log::Level::Info).expect("日志初始化失败");
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
