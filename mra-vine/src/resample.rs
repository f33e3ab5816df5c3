//! 适配固定推理张量的重采样规划.
//!
//! 推理容器只接受 [`crate::consts::TARGET_SHAPE`] 尺寸的张量,
//! 因此任意尺寸的输入体数据送入容器前都要重采样一次; 容器输出的
//! 概率图再按原始间距映射回源几何. 重采样算法本身由外部计算模块
//! 完成, 本模块只负责几何账目.

use itertools::izip;

use crate::modules::ModuleParams;
use crate::{Idx3d, MmSpacing, NiftiGeom};

/// 重采样规划的构造错误.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlanError {
    /// 某一轴的体素个数为 0. 参数为轴下标 (0 = z, 1 = h, 2 = w).
    ZeroDim(usize),

    /// 某一轴的体素间距非正或非有限. 参数依次为轴下标和实际值.
    BadSpacing(usize, f64),
}

impl std::fmt::Display for PlanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroDim(axis) => write!(f, "第 {axis} 轴体素个数为 0"),
            Self::BadSpacing(axis, v) => write!(f, "第 {axis} 轴体素间距非法: {v}"),
        }
    }
}

impl std::error::Error for PlanError {}

/// 一次 "适配固定张量" 重采样的几何账目.
///
/// 该结构是纯数据: 持有源几何与目标形状, 导出正向与还原两个方向的
/// 间距及外部重采样模块的参数表.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResamplePlan {
    orig_shape: Idx3d,
    orig_spacing: MmSpacing,
    target_shape: Idx3d,
}

/// 将 `Idx3d` 展开为 `[f64; 3]` 以便逐轴计算.
#[inline]
fn axes(shape: Idx3d) -> [f64; 3] {
    let (z, h, w) = shape;
    [z as f64, h as f64, w as f64]
}

impl ResamplePlan {
    /// 由源几何与目标形状直接构造规划.
    ///
    /// `orig_shape`, `orig_spacing`, `target_shape` 均按 `(z, h, w)` 顺序.
    /// 任一轴的体素个数为 0 或间距非正时返回 `Err`.
    pub fn new(
        orig_shape: Idx3d,
        orig_spacing: MmSpacing,
        target_shape: Idx3d,
    ) -> Result<Self, PlanError> {
        for (axis, (&dim, &target)) in axes(orig_shape)
            .iter()
            .zip(axes(target_shape).iter())
            .enumerate()
        {
            if dim == 0.0 || target == 0.0 {
                return Err(PlanError::ZeroDim(axis));
            }
        }
        for (axis, &sp) in orig_spacing.iter().enumerate() {
            if !(sp.is_finite() && sp > 0.0) {
                return Err(PlanError::BadSpacing(axis, sp));
            }
        }
        Ok(Self {
            orig_shape,
            orig_spacing,
            target_shape,
        })
    }

    /// 从体数据几何构造规划.
    #[inline]
    pub fn fit(volume: &impl NiftiGeom, target_shape: Idx3d) -> Result<Self, PlanError> {
        Self::new(volume.shape(), volume.spacing(), target_shape)
    }

    /// 源形状.
    #[inline]
    pub fn orig_shape(&self) -> Idx3d {
        self.orig_shape
    }

    /// 目标形状.
    #[inline]
    pub fn target_shape(&self) -> Idx3d {
        self.target_shape
    }

    /// 正向重采样间距: `fit[i] = orig_spacing[i] * orig_dim[i] / target_dim[i]`.
    ///
    /// 按该间距重采样后, 体数据恰好落入目标形状, 且每轴的物理尺寸
    /// (间距 × 体素数) 不变.
    pub fn fit_spacing(&self) -> MmSpacing {
        let mut out = [0.0; 3];
        for (o, sp, dim, target) in izip!(
            &mut out,
            self.orig_spacing,
            axes(self.orig_shape),
            axes(self.target_shape)
        ) {
            *o = sp * dim / target;
        }
        out
    }

    /// 还原方向的间距, 即源体数据的原始间距.
    ///
    /// 概率图按该间距重采样后回到源几何, 与正向变换满足同一比例关系.
    #[inline]
    pub fn restore_spacing(&self) -> MmSpacing {
        self.orig_spacing
    }

    /// 构造正向重采样模块的参数表.
    ///
    /// 键名沿用宿主 CLI 模块约定; `spacing` 以 `x,y,z` (即 `w,h,z`)
    /// 顺序的毫米值逗号串给出.
    pub fn forward_params(
        &self,
        input: &std::path::Path,
        output: &std::path::Path,
    ) -> ModuleParams {
        Self::resample_params(input, output, self.fit_spacing())
    }

    /// 构造还原方向重采样模块的参数表.
    pub fn restore_params(
        &self,
        input: &std::path::Path,
        output: &std::path::Path,
    ) -> ModuleParams {
        Self::resample_params(input, output, self.restore_spacing())
    }

    fn resample_params(
        input: &std::path::Path,
        output: &std::path::Path,
        spacing: MmSpacing,
    ) -> ModuleParams {
        let [z, h, w] = spacing;
        let mut params = ModuleParams::new();
        params.set_path("inputVolume", input);
        params.set_path("outputVolume", output);
        params.set_str("spacing", format!("{w},{h},{z}"));
        params.set_str("interpolation", "linear");
        params
    }
}
