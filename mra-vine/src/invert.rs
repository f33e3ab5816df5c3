//! 反转强度变换.
//!
//! 即均匀填充图像减去源图像: `out = fill - in`, 负值截断为 0.
//! 等值面提取前以该变换翻转概率图的意义. 当体素值全部落在
//! `[0, fill]` 区间内时, 该变换是对合的 (做两次还原原图).

use crate::MrVolume;

/// 原地反转: `v <- max(fill - v, 0)`.
pub fn invert_in_place(volume: &mut MrVolume, fill: f32) {
    volume.data_mut().mapv_inplace(|v| (fill - v).max(0.0));
}

/// 反转并返回新体数据, 几何与源一致.
pub fn invert(volume: &MrVolume, fill: f32) -> MrVolume {
    let mut out = volume.clone();
    invert_in_place(&mut out, fill);
    out
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::prelude::*;

        /// 借助 `rayon`, 并行地原地反转: `v <- max(fill - v, 0)`.
        pub fn par_invert_in_place(volume: &mut MrVolume, fill: f32) {
            let mut data = volume.data_mut();
            // 数据恒为标准布局, 可直接 unwrap.
            let slice = data.as_slice_mut().unwrap();
            slice.par_iter_mut().for_each(|v| *v = (fill - *v).max(0.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MrVolume;

    fn float_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_invert_is_uniform_minus_source() {
        let mut vol = MrVolume::synthetic((2, 2, 2), [1.0; 3], 0.0);
        vol[(0, 0, 0)] = 0.2;
        vol[(1, 1, 1)] = 1.0;
        let out = invert(&vol, 1.0);
        assert!(float_eq(out[(0, 0, 0)], 0.8));
        assert!(float_eq(out[(1, 1, 1)], 0.0));
        assert!(float_eq(out[(0, 1, 0)], 1.0));
    }

    #[test]
    fn test_involutive_within_fill_range() {
        let mut vol = MrVolume::synthetic((2, 3, 4), [1.0; 3], 0.0);
        for (i, v) in vol.data_mut().iter_mut().enumerate() {
            *v = (i as f32) / 23.0; // 全部落在 [0, 1].
        }
        let twice = invert(&invert(&vol, 1.0), 1.0);
        for (a, b) in vol.data().iter().zip(twice.data().iter()) {
            assert!(float_eq(*a, *b));
        }
    }

    #[test]
    fn test_clipping_breaks_involution() {
        // fill 之外的值会被截断, 二次反转后不再还原.
        let mut vol = MrVolume::synthetic((1, 1, 2), [1.0; 3], 0.0);
        vol[(0, 0, 0)] = 2.0; // > fill
        let twice = invert(&invert(&vol, 1.0), 1.0);
        assert!(float_eq(twice[(0, 0, 0)], 1.0));
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_par_matches_serial() {
        let mut a = MrVolume::synthetic((3, 5, 7), [1.0; 3], 0.0);
        for (i, v) in a.data_mut().iter_mut().enumerate() {
            *v = (i % 11) as f32 / 11.0;
        }
        let mut b = a.clone();
        invert_in_place(&mut a, 1.0);
        par_invert_in_place(&mut b, 1.0);
        assert_eq!(a.data(), b.data());
    }
}
