//! 流水线编排.
//!
//! 把各独立部件串成一次完整的血管分割运行:
//! 校验 -> 几何规划 -> 正向重采样 -> 推理容器 -> 导入概率图 ->
//! 还原几何 -> 记录关联 -> 强度反转 -> 表面提取.
//! 任一外部协作方失败即带类型错误中止, 不做重试.

use std::fmt;
use std::path::PathBuf;

use crate::consts;
use crate::docker::{DockerError, ImageRef, InferenceEngine};
use crate::invert;
use crate::modules::{ModuleError, ModuleParams, ModuleRegistry};
use crate::resample::{PlanError, ResamplePlan};
use crate::scene::{self, NodeCheckError, NodeId, Scene};
use crate::staging::{Staging, StagingError};
use crate::{Idx3d, MrVolume};

/// 默认重采样模块名.
pub const RESAMPLE_MODULE: &str = "resamplescalarvolume";

/// 默认表面提取模块名.
pub const SURFACE_MODULE: &str = "modelmaker";

/// 流水线阶段.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stage {
    /// 正向重采样至固定张量.
    Resample,

    /// 推理容器运行中.
    Inference,

    /// 检查并导入容器输出.
    ImportOutput,

    /// 概率图还原回源几何.
    Restore,

    /// 强度反转.
    Invert,

    /// 表面提取.
    Surface,
}

/// 进度事件. 经调用方提供的回调上报, 不依赖任何事件循环.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Progress {
    /// 进入某一阶段.
    Stage(Stage),

    /// 镜像拉取进度, 取值 0.0 ..= 1.0.
    Pull(f64),
}

/// 流水线运行错误.
#[derive(Debug)]
pub enum PipelineError {
    /// 节点校验失败.
    Node(NodeCheckError),

    /// 重采样规划失败 (退化几何).
    Plan(PlanError),

    /// 计算模块调用失败.
    Module(ModuleError),

    /// 容器运行时失败.
    Docker(DockerError),

    /// 挂载目录文件约定失败.
    Staging(StagingError),

    /// nii 读写失败.
    Nifti(nifti::NiftiError),

    /// 表面提取模块未产出网格文件.
    MissingMesh(PathBuf),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(e) => write!(f, "节点校验失败: {e}"),
            Self::Plan(e) => write!(f, "重采样规划失败: {e}"),
            Self::Module(e) => write!(f, "计算模块失败: {e}"),
            Self::Docker(e) => write!(f, "容器运行时失败: {e}"),
            Self::Staging(e) => write!(f, "挂载目录失败: {e}"),
            Self::Nifti(e) => write!(f, "nii 读写失败: {e}"),
            Self::MissingMesh(p) => write!(f, "未产出网格文件: {}", p.display()),
        }
    }
}

impl std::error::Error for PipelineError {}

/// 一次流水线运行的全部配置.
#[derive(Debug, Clone)]
pub struct VesselSegConfig {
    /// 推理镜像引用.
    pub image: ImageRef,

    /// 固定推理张量形状, `(z, h, w)`.
    pub target_shape: Idx3d,

    /// 表面提取阈值, 作用于反转后的概率图.
    pub threshold: f32,

    /// docker 挂载目录.
    pub staging_dir: PathBuf,

    /// 重采样模块名.
    pub resample_module: String,

    /// 表面提取模块名.
    pub surface_module: String,
}

impl VesselSegConfig {
    /// 标准配置: 固定摘要镜像、默认张量形状、默认阈值、默认挂载目录.
    pub fn standard() -> Self {
        Self {
            image: ImageRef::pinned_vessel_seg(),
            target_shape: consts::TARGET_SHAPE,
            threshold: consts::DEFAULT_SURFACE_THRESHOLD,
            staging_dir: Staging::default_dir(),
            resample_module: RESAMPLE_MODULE.to_owned(),
            surface_module: SURFACE_MODULE.to_owned(),
        }
    }
}

/// 血管分割流水线.
///
/// 推理引擎与计算模块注册表均由调用方注入, 流水线自身不持有
/// 任何外部进程句柄.
pub struct VesselSegPipeline<'a> {
    config: VesselSegConfig,
    engine: &'a dyn InferenceEngine,
    registry: &'a ModuleRegistry,
}

impl<'a> VesselSegPipeline<'a> {
    /// 组装流水线.
    pub fn new(
        config: VesselSegConfig,
        engine: &'a dyn InferenceEngine,
        registry: &'a ModuleRegistry,
    ) -> Self {
        Self {
            config,
            engine,
            registry,
        }
    }

    /// 当前配置.
    #[inline]
    pub fn config(&self) -> &VesselSegConfig {
        &self.config
    }

    /// 预先拉取推理镜像. 进度经 `progress` 上报.
    pub fn pull_image(
        &self,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<(), PipelineError> {
        self.engine
            .pull(&self.config.image, &mut |ratio| {
                progress(Progress::Pull(ratio));
            })
            .map_err(PipelineError::Docker)
    }

    /// 运行一次完整的分割流水线.
    ///
    /// `input` 为源 MRA 体积节点, `prob_out` 为接收还原后概率图的
    /// 体积节点 (必须不同于 `input`), `model_out` 为接收表面网格的
    /// 模型节点. 成功后 `input` 节点上会以
    /// [`consts::ATTR_PROB_MAP`] 记录概率图关联.
    pub fn run(
        &self,
        scene: &mut Scene,
        input: NodeId,
        prob_out: NodeId,
        model_out: NodeId,
        progress: &mut dyn FnMut(Progress),
    ) -> Result<(), PipelineError> {
        scene::check_run_nodes(scene, input, prob_out, model_out).map_err(PipelineError::Node)?;
        log::info!("vesselseg | 开始处理 {input}");

        let staging =
            Staging::prepare(self.config.staging_dir.clone()).map_err(PipelineError::Staging)?;

        // 校验已通过, 输入节点与数据必然存在, 可直接 unwrap.
        let plan = {
            let vol = scene.volume(input).unwrap().volume().unwrap();
            let plan =
                ResamplePlan::fit(vol, self.config.target_shape).map_err(PipelineError::Plan)?;
            staging.stage_source(vol).map_err(PipelineError::Staging)?;
            plan
        };

        progress(Progress::Stage(Stage::Resample));
        let params = plan.forward_params(&staging.source_path(), &staging.input_path());
        self.registry
            .run(&self.config.resample_module, &params)
            .map_err(PipelineError::Module)?;

        progress(Progress::Stage(Stage::Inference));
        self.engine
            .run_inference(&self.config.image, staging.dir())
            .map_err(PipelineError::Docker)?;

        progress(Progress::Stage(Stage::ImportOutput));
        let output = staging.check_output().map_err(PipelineError::Staging)?;

        progress(Progress::Stage(Stage::Restore));
        let params = plan.restore_params(&output, &staging.restored_path());
        self.registry
            .run(&self.config.resample_module, &params)
            .map_err(PipelineError::Module)?;
        let mut prob = MrVolume::open(staging.restored_path()).map_err(PipelineError::Nifti)?;
        // header 间距以规划为准, 与还原几何保持一致.
        prob.set_spacing(plan.restore_spacing());

        scene
            .volume_mut(input)
            .unwrap()
            .set_attr(consts::ATTR_PROB_MAP, prob_out.to_string());

        progress(Progress::Stage(Stage::Invert));
        let fill = prob.max_value();
        let inverted = invert::invert(&prob, fill);
        inverted
            .save(staging.inverted_path())
            .map_err(PipelineError::Nifti)?;
        scene.volume_mut(prob_out).unwrap().set_volume(prob);

        progress(Progress::Stage(Stage::Surface));
        let mesh = staging.model_path();
        let mut params = ModuleParams::new();
        params.set_path("inputVolume", staging.inverted_path());
        params.set_path("outputMesh", &mesh);
        params.set_float("threshold", self.config.threshold as f64);
        self.registry
            .run(&self.config.surface_module, &params)
            .map_err(PipelineError::Module)?;
        if !mesh.is_file() {
            return Err(PipelineError::MissingMesh(mesh));
        }
        scene.model_mut(model_out).unwrap().set_mesh_path(mesh);

        log::info!("vesselseg | 处理完成");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{ComputeModule, ModuleError};
    use crate::{MrVolume, NiftiGeom};
    use std::fs;
    use std::path::PathBuf;

    /// 测试专用的独立临时目录.
    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("mra-vine-pipeline-test-{tag}-{}", std::process::id()))
    }

    fn test_config(tag: &str) -> VesselSegConfig {
        let mut config = VesselSegConfig::standard();
        config.staging_dir = scratch_dir(tag);
        // 桩重采样模块不改变几何, 因此目标形状取输入形状.
        config.target_shape = (4, 4, 4);
        config
    }

    fn test_scene() -> (Scene, NodeId, NodeId, NodeId) {
        let mut scene = Scene::new();
        let input =
            scene.add_volume_with("mra", MrVolume::synthetic((4, 4, 4), [1.0; 3], 100.0));
        let prob = scene.add_volume("probmap");
        let model = scene.add_model("vessels");
        (scene, input, prob, model)
    }

    /// 推理引擎桩: 按容器输入的几何写出常数概率图.
    struct FakeEngine;

    impl InferenceEngine for FakeEngine {
        fn pull(
            &self,
            _image: &ImageRef,
            on_ratio: &mut dyn FnMut(f64),
        ) -> Result<(), DockerError> {
            on_ratio(0.5);
            on_ratio(1.0);
            Ok(())
        }

        fn run_inference(
            &self,
            _image: &ImageRef,
            host_dir: &std::path::Path,
        ) -> Result<(), DockerError> {
            let input = MrVolume::open(host_dir.join(consts::staging::INPUT_FILE)).unwrap();
            let prob = input.uniform_like(0.25);
            prob.save(host_dir.join(consts::staging::OUTPUT_FILE)).unwrap();
            Ok(())
        }
    }

    /// 推理引擎桩: 什么也不产出.
    struct SilentEngine;

    impl InferenceEngine for SilentEngine {
        fn pull(
            &self,
            _image: &ImageRef,
            _on_ratio: &mut dyn FnMut(f64),
        ) -> Result<(), DockerError> {
            Ok(())
        }

        fn run_inference(
            &self,
            _image: &ImageRef,
            _host_dir: &std::path::Path,
        ) -> Result<(), DockerError> {
            Ok(())
        }
    }

    /// 重采样桩: 原样复制, 不改变几何.
    struct CopyResample;

    impl ComputeModule for CopyResample {
        fn name(&self) -> &str {
            RESAMPLE_MODULE
        }

        fn run(&self, params: &ModuleParams) -> Result<(), ModuleError> {
            let input = params
                .get_path("inputVolume")
                .ok_or(ModuleError::MissingParam("inputVolume"))?;
            let output = params
                .get_path("outputVolume")
                .ok_or(ModuleError::MissingParam("outputVolume"))?;
            fs::copy(input, output).map_err(ModuleError::Launch)?;
            Ok(())
        }
    }

    /// 表面提取桩: 在约定路径产出占位网格文件.
    struct TouchSurface;

    impl ComputeModule for TouchSurface {
        fn name(&self) -> &str {
            SURFACE_MODULE
        }

        fn run(&self, params: &ModuleParams) -> Result<(), ModuleError> {
            let mesh = params
                .get_path("outputMesh")
                .ok_or(ModuleError::MissingParam("outputMesh"))?;
            fs::write(mesh, b"solid vessels\nendsolid vessels\n").map_err(ModuleError::Launch)?;
            Ok(())
        }
    }

    fn stub_registry() -> ModuleRegistry {
        let mut reg = ModuleRegistry::new();
        reg.register(Box::new(CopyResample));
        reg.register(Box::new(TouchSurface));
        reg
    }

    #[test]
    fn test_full_run_with_stubs() {
        let (mut scene, input, prob, model) = test_scene();
        let config = test_config("full");
        let dir = config.staging_dir.clone();
        let registry = stub_registry();
        let pipeline = VesselSegPipeline::new(config, &FakeEngine, &registry);

        let mut stages = Vec::new();
        pipeline
            .run(&mut scene, input, prob, model, &mut |p| {
                if let Progress::Stage(s) = p {
                    stages.push(s);
                }
            })
            .unwrap();

        assert_eq!(
            stages,
            [
                Stage::Resample,
                Stage::Inference,
                Stage::ImportOutput,
                Stage::Restore,
                Stage::Invert,
                Stage::Surface,
            ]
        );

        // 概率图节点已填充且几何与源一致.
        let prob_node = scene.volume(prob).unwrap();
        let restored = prob_node.volume().unwrap();
        assert_eq!(restored.shape(), (4, 4, 4));
        assert_eq!(restored.spacing(), [1.0, 1.0, 1.0]);

        // 源节点记录了概率图关联.
        assert_eq!(
            scene.volume(input).unwrap().attr(consts::ATTR_PROB_MAP),
            Some(prob.to_string().as_str())
        );

        // 模型节点拿到了网格文件.
        let mesh = scene.model(model).unwrap().mesh_path().unwrap();
        assert!(mesh.is_file());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_container_output_aborts() {
        let (mut scene, input, prob, model) = test_scene();
        let config = test_config("silent");
        let dir = config.staging_dir.clone();
        let registry = stub_registry();
        let pipeline = VesselSegPipeline::new(config, &SilentEngine, &registry);

        let err = pipeline
            .run(&mut scene, input, prob, model, &mut |_| {})
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Staging(StagingError::MissingOutput(_))
        ));

        // 失败即中止: 概率图节点未被填充.
        assert!(!scene.volume(prob).unwrap().has_image_data());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_unregistered_module_aborts() {
        let (mut scene, input, prob, model) = test_scene();
        let config = test_config("nomod");
        let dir = config.staging_dir.clone();
        let registry = ModuleRegistry::new();
        let pipeline = VesselSegPipeline::new(config, &FakeEngine, &registry);

        let err = pipeline
            .run(&mut scene, input, prob, model, &mut |_| {})
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Module(ModuleError::UnknownModule(_))
        ));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_validation_runs_before_staging() {
        let (mut scene, input, _prob, model) = test_scene();
        let registry = stub_registry();
        let config = test_config("valid");
        let pipeline = VesselSegPipeline::new(config, &FakeEngine, &registry);

        // 输入输出同节点: 在接触文件系统之前就应失败.
        let err = pipeline
            .run(&mut scene, input, input, model, &mut |_| {})
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Node(scene::NodeCheckError::SameNode(_))
        ));
    }

    #[test]
    fn test_pull_forwards_ratio() {
        let registry = stub_registry();
        let config = test_config("pull");
        let pipeline = VesselSegPipeline::new(config, &FakeEngine, &registry);

        let mut ratios = Vec::new();
        pipeline
            .pull_image(&mut |p| {
                if let Progress::Pull(r) = p {
                    ratios.push(r);
                }
            })
            .unwrap();
        assert_eq!(ratios, [0.5, 1.0]);
    }
}
