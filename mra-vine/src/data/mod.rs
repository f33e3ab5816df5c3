use std::ops::{Index, IndexMut};
use std::path::Path;

use ndarray::{Array3, ArrayView, ArrayViewMut, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::{Idx3d, MmSpacing};

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 将 (W, H, z) 转换成 (z, H, W). 以后均按照该模式访问.
#[inline]
fn get_shape_from_header(h: &NiftiHeader) -> Idx3d {
    // [W, H, z]. 体素个数数组.
    let [_, w, h, z, ..] = h.dim;
    (z as usize, h as usize, w as usize)
}

/// nii 格式 3D 体数据 header 的共用属性和部分通用操作.
pub trait NiftiGeom {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取数据形状大小.
    #[inline]
    fn shape(&self) -> Idx3d {
        get_shape_from_header(self.header())
    }

    /// 获取数据体素个数.
    #[inline]
    fn size(&self) -> usize {
        let (z, h, w) = self.shape();
        z * h * w
    }

    /// 检查索引是否合法.
    #[inline]
    fn check(&self, (z0, h0, w0): &Idx3d) -> bool {
        let (z, h, w) = self.shape();
        *z0 < z && *h0 < h && *w0 < w
    }

    /// 获取单个体素分辨率. 该分辨率以毫米为单位, 顺序为 `[z, h, w]`
    /// (相邻切片方向, 自然图像垂直方向, 自然图像水平方向).
    #[inline]
    fn spacing(&self) -> MmSpacing {
        let [_, w, h, z, ..] = self.header().pixdim;
        [z as f64, h as f64, w as f64]
    }

    /// 体素分辨率在三个维度上是否是各向同的?
    #[inline]
    fn is_isotropic(&self) -> bool {
        let [z, h, w] = self.spacing();
        z == h && z == w
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.spacing().iter().product()
    }
}

/// nii 格式 3D 体数据, 包括 header 和标量场. 体素值以 `f32` 保存.
///
/// MRA 扫描和容器输出的概率图都用该结构承载.
#[derive(Debug, Clone)]
pub struct MrVolume {
    header: BoxedHeader,
    data: Array3<f32>,
}

impl NiftiGeom for MrVolume {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl Index<Idx3d> for MrVolume {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for MrVolume {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl MrVolume {
    /// 打开 nii 文件格式的 3D 体数据. `path` 为 nii (或 nii.gz) 文件的本地路径.
    /// 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open<P: AsRef<Path>>(path: P) -> nifti::Result<Self> {
        let obj = ReaderOptions::new().read_file(path.as_ref())?;
        let header = Box::new(obj.header().clone());

        // [W, H, z] -> [z, H, W].
        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = obj
            .into_volume()
            .into_ndarray::<f32>()?
            .permuted_axes([2, 1, 0].as_slice());

        // The nature of nifti data field layout.
        debug_assert!(data.is_standard_layout());

        // 该操作不会生成 `Err`, 可直接 unwrap.
        let data =
            Array3::<f32>::from_shape_vec(get_shape_from_header(&header), data.into_raw_vec())
                .unwrap();

        Ok(Self { header, data })
    }

    /// 将体数据保存为 nii 文件. header 按当前实体原样引用.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> nifti::Result<()> {
        // (z, H, W) -> (W, H, z), 与 nifti 磁盘布局一致.
        let data = self.data.view().permuted_axes([2, 1, 0]);
        WriterOptions::new(path.as_ref())
            .reference_header(&self.header)
            .write_nifti(&data)
    }

    /// 根据裸数据和部分元信息直接创建 `MrVolume` 实体.
    ///
    /// # 参数
    ///
    /// 1. `shape` 与 `spacing` 按照本库惯例以 `(z, h, w)` 顺序给出.
    /// 2. 所有体素以 `fill` 填充.
    ///
    /// # 注意
    ///
    /// 该方法可能会创建不一致的实体, 因此你应仅将其用于实验目的.
    pub fn synthetic(shape: Idx3d, spacing: MmSpacing, fill: f32) -> Self {
        let (z, h, w) = shape;
        assert_ne!(z * h * w, 0, "体数据形状不可含 0");

        let mut header = Box::<NiftiHeader>::default();
        header.dim = [3, w as u16, h as u16, z as u16, 1, 1, 1, 1];
        let [sz, sh, sw] = spacing;
        header.pixdim = [1.0, sw as f32, sh as f32, sz as f32, 1.0, 1.0, 1.0, 1.0];
        header.intent_name[..4].copy_from_slice(b"synt");

        Self {
            header,
            data: Array3::from_elem(shape, fill),
        }
    }

    /// 判断该结构是否是由 `synthetic` 手动拼接的.
    pub fn is_synthetic(&self) -> bool {
        self.header.intent_name.starts_with(b"synt")
    }

    /// 创建一个与 `self` 几何一致、所有体素为 `fill` 的均匀填充体数据.
    pub fn uniform_like(&self, fill: f32) -> Self {
        Self {
            header: self.header.clone(),
            data: Array3::from_elem(self.shape(), fill),
        }
    }

    /// 重写 header 中的体素间距. `spacing` 以 `[z, h, w]` 顺序给出.
    ///
    /// 重采样规划确定后, 以该方法使 header 与新几何保持一致.
    pub fn set_spacing(&mut self, spacing: MmSpacing) {
        let [sz, sh, sw] = spacing;
        let [_, pw, ph, pz, ..] = &mut self.header.pixdim;
        (*pw, *ph, *pz) = (sw as f32, sh as f32, sz as f32);
    }

    /// 获取体素最大值. 非有限值 (inf, NaN) 会被忽略.
    ///
    /// 体数据恒非空, 因此该值总是存在.
    pub fn max_value(&self) -> f32 {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(f32::MIN, f32::max)
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView<'_, f32, Ix3> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, f32, Ix3> {
        self.data.view_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_geometry() {
        let vol = MrVolume::synthetic((4, 8, 16), [2.5, 1.0, 0.5], 7.0);
        assert!(vol.is_synthetic());
        assert_eq!(vol.shape(), (4, 8, 16));
        assert_eq!(vol.size(), 4 * 8 * 16);
        assert_eq!(vol.spacing(), [2.5, 1.0, 0.5]);
        assert!(!vol.is_isotropic());
        assert_eq!(vol[(3, 7, 15)], 7.0);
    }

    #[test]
    fn test_set_spacing_round_trip() {
        let mut vol = MrVolume::synthetic((2, 2, 2), [1.0, 1.0, 1.0], 0.0);
        assert!(vol.is_isotropic());
        vol.set_spacing([3.0, 2.0, 1.0]);
        assert_eq!(vol.spacing(), [3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_uniform_like_shares_geometry() {
        let vol = MrVolume::synthetic((3, 5, 7), [1.5, 0.8, 0.8], 42.0);
        let fill = vol.uniform_like(1.0);
        assert_eq!(fill.shape(), vol.shape());
        assert_eq!(fill.spacing(), vol.spacing());
        assert!(fill.data().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_max_value_skips_non_finite() {
        let mut vol = MrVolume::synthetic((1, 2, 2), [1.0, 1.0, 1.0], 0.25);
        vol[(0, 0, 0)] = f32::NAN;
        vol[(0, 0, 1)] = f32::INFINITY;
        vol[(0, 1, 0)] = 0.75;
        assert_eq!(vol.max_value(), 0.75);
    }
}
