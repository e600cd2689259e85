//! micro-CT 逐骨分割命令行工具.

use std::error::Error;
use std::process::ExitCode;

use log::info;

use ct_osseo::prelude::*;

fn usage(program: &str) -> String {
    format!(
        "用法: {program} <输入CT.nii.gz> <输出标签.nii.gz> [皮质骨厚度(mm)] [--whole-bones]\n\
         \n\
         默认皮质骨厚度 0.1mm. 指定 --whole-bones 时每块骨输出单一标签,\n\
         否则输出皮质骨 (3b-2) / 松质骨 (3b-1) / 骨髓 (3b) 三类标签."
    )
}

fn run() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = SeparatorConfig::default();
    let mut positional = Vec::new();
    for a in &args[1..] {
        if a == "--whole-bones" {
            config.whole_bones = true;
        } else {
            positional.push(a.clone());
        }
    }
    if positional.len() < 2 || positional.len() > 3 {
        return Err(usage(&args[0]).into());
    }
    if let Some(t) = positional.get(2) {
        config.cortical_thickness = t.parse()?;
    }

    let timer = StageTimer::new();
    let scan = CtScan::open(&positional[0])?;
    let header = scan.header().clone();
    info!(
        "读入 {}: {:?} 体素, 皮质骨厚度 {}mm",
        positional[0],
        scan.shape(),
        config.cortical_thickness
    );
    timer.stage("读入体数据");

    let denoised = median_filter(&scan.into_grid());
    timer.stage("中值滤波");

    let out = separate_bones(&denoised, &config, &timer, &LogProgress)?;
    info!(
        "共 {} 块骨骼, 其中 {} 块是孤岛",
        out.bone_count,
        out.replaced_by.iter().filter(|r| **r > 0).count()
    );

    CtLabel::from_grid(&header, out.labels).save(&positional[1])?;
    timer.stage("写出标签");
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
