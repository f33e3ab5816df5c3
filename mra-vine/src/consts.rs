//! 通用常量.

/// 推理容器镜像与调用约定.
pub mod infer {
    /// 推理镜像名.
    pub const IMAGE_NAME: &str = "li3igtlab/brain-vessel-seg";

    /// 推理镜像摘要. 按上游发布原样固定, 不携带 `sha256:` 前缀.
    pub const IMAGE_DIGEST: &str =
        "f5b58cc46f2868d572f214796bc663ecf8e94296dcb36c02406d64269f44130b";

    /// 镜像下载体积, 以 MB 为单位. 仅用于下载前提示.
    pub const IMAGE_SIZE_MB: u32 = 590;

    /// 容器内的数据挂载点. 宿主挂载目录映射至此.
    pub const MOUNT_POINT: &str = "/workspace/data/Case1";

    /// 容器内 NiftyNet 推理入口脚本.
    pub const NET_RUN: &str = "/workspace/NiftyNet/net_run.py";

    /// NiftyNet 应用类.
    pub const APP_CLASS: &str =
        "niftynet.application.segmentation_application.SegmentationApplication";

    /// 容器内推理配置文件路径.
    pub const APP_CONFIG: &str = "/workspace/NiftyNet/config/vessel_seg.ini";
}

/// 挂载目录内的固定文件名.
pub mod staging {
    /// 原始输入体数据的暂存文件名 (重采样模块的输入).
    pub const SOURCE_FILE: &str = "source.nii";

    /// 重采样后送入容器的输入文件名.
    pub const INPUT_FILE: &str = "Case1.nii";

    /// 容器输出的概率图文件名.
    pub const OUTPUT_FILE: &str = "Case1_niftynet_out.nii";

    /// 还原回源几何后的概率图文件名.
    pub const RESTORED_FILE: &str = "probmap.nii";

    /// 强度反转后的概率图文件名 (表面提取模块的输入).
    pub const INVERTED_FILE: &str = "inverted.nii";

    /// 表面提取模块产出的网格文件名.
    pub const MODEL_FILE: &str = "model.stl";
}

/// 推理张量的固定体素尺寸, 顺序为 `(z, h, w)`.
///
/// 任意尺寸的输入体数据都会被重采样到该尺寸后再送入容器.
pub const TARGET_SHAPE: crate::Idx3d = (128, 448, 448);

/// 体积节点上记录概率图关联的属性键. 属性值为概率图节点 id.
pub const ATTR_PROB_MAP: &str = "vesselseg.probmap";

/// 默认的表面提取阈值, 作用于反转后的概率图.
pub const DEFAULT_SURFACE_THRESHOLD: f32 = 0.5;
