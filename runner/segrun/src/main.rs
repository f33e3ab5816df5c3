//! 命令行入口: 对单个 MRA nii 文件运行容器化血管分割流水线.
//!
//! 用法: `segrun [--pull] <输入 nii> [输出网格路径]`
//!
//! 环境变量:
//!
//! 1. `SEGRUN_DOCKER`: docker 可执行文件路径, 缺省时按平台默认路径探测;
//! 2. `SEGRUN_RESAMPLE_CLI`: 外部重采样模块可执行文件 (必需);
//! 3. `SEGRUN_SURFACE_CLI`: 外部表面提取模块可执行文件 (必需);
//! 4. `SEGRUN_STAGING_DIR`: docker 挂载目录, 缺省时为
//!   `{用户主目录}/.mra-vine/staging`.

use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use mra_vine::prelude::*;

/// 已解析的命令行参数.
struct Args {
    input: PathBuf,
    output_mesh: Option<PathBuf>,
    pull: bool,
}

fn usage() {
    eprintln!("用法: segrun [--pull] <输入 nii> [输出网格路径]");
    eprintln!("  --pull  运行前先拉取推理镜像 (约 {} MB)", consts::infer::IMAGE_SIZE_MB);
}

/// 命令行解析结果: 请求帮助, 或一次完整的运行参数.
enum Cli {
    Help,
    Run(Args),
}

fn parse_args() -> Option<Cli> {
    let mut pull = false;
    let mut rest = Vec::new();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--pull" => pull = true,
            "-h" | "--help" => return Some(Cli::Help),
            _ => rest.push(PathBuf::from(arg)),
        }
    }
    let mut rest = rest.into_iter();
    let input = rest.next()?;
    Some(Cli::Run(Args {
        input,
        output_mesh: rest.next(),
        pull,
    }))
}

/// 从环境变量或平台默认路径获取 docker 入口.
fn docker_from_env() -> Result<DockerCli, DockerError> {
    match env::var("SEGRUN_DOCKER") {
        Ok(path) => Ok(DockerCli::new(path)),
        Err(_) => DockerCli::locate(),
    }
}

/// 从环境变量注册外部计算模块.
fn registry_from_env() -> Result<ModuleRegistry, String> {
    let mut registry = ModuleRegistry::new();
    for (var, name) in [
        ("SEGRUN_RESAMPLE_CLI", RESAMPLE_MODULE),
        ("SEGRUN_SURFACE_CLI", SURFACE_MODULE),
    ] {
        let program = env::var(var).map_err(|_| format!("环境变量 {var} 未设置"))?;
        registry.register(Box::new(ExternalCliModule::new(name, program)));
    }
    Ok(registry)
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Resample => "重采样至推理张量",
        Stage::Inference => "运行推理容器",
        Stage::ImportOutput => "导入容器输出",
        Stage::Restore => "还原概率图几何",
        Stage::Invert => "反转强度",
        Stage::Surface => "提取血管表面",
    }
}

fn report(progress: Progress) {
    match progress {
        Progress::Stage(stage) => println!("==> {}", stage_label(stage)),
        Progress::Pull(ratio) => {
            print!("\r拉取镜像: {:>3.0}%", ratio * 100.0);
            let _ = std::io::stdout().flush();
        }
    }
}

fn run() -> Result<(), String> {
    let args = match parse_args() {
        Some(Cli::Help) => {
            usage();
            return Ok(());
        }
        Some(Cli::Run(args)) => args,
        None => {
            usage();
            return Err("参数不足".to_owned());
        }
    };

    let docker = docker_from_env().map_err(|e| e.to_string())?;
    log::info!("docker: {}", docker.path().display());

    let registry = registry_from_env()?;

    let mut config = VesselSegConfig::standard();
    if let Ok(dir) = env::var("SEGRUN_STAGING_DIR") {
        config.staging_dir = PathBuf::from(dir);
    }

    let pipeline = VesselSegPipeline::new(config, &docker, &registry);

    if args.pull {
        pipeline.pull_image(&mut report).map_err(|e| e.to_string())?;
        // 进度行以 \r 覆写自身, 结束后补换行.
        println!();
    }

    let volume = MrVolume::open(&args.input)
        .map_err(|e| format!("无法打开 {}: {e}", args.input.display()))?;
    log::info!(
        "输入: {}, 形状 {:?}, 间距 {:?} mm",
        args.input.display(),
        volume.shape(),
        volume.spacing()
    );

    let mut scene = Scene::new();
    let input = scene.add_volume_with("mra", volume);
    let prob = scene.add_volume("probmap");
    let model = scene.add_model("vessels");

    pipeline
        .run(&mut scene, input, prob, model, &mut report)
        .map_err(|e| e.to_string())?;

    // 校验成功后模型节点必然携带网格路径, 可直接 unwrap.
    let mesh = scene.model(model).unwrap().mesh_path().unwrap();
    match args.output_mesh {
        Some(target) => {
            fs::copy(mesh, &target)
                .map_err(|e| format!("无法复制网格到 {}: {e}", target.display()))?;
            println!("网格已保存到 {}", target.display());
        }
        None => println!("网格位于 {}", mesh.display()),
    }
    Ok(())
}

fn main() -> ExitCode {
    // 重复初始化无害, 忽略其错误.
    let _ = simple_logger::init_with_level(log::Level::Info);

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            log::error!("{msg}");
            ExitCode::FAILURE
        }
    }
}
