#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 面向脑部 MRA (磁共振血管成像) nifti 体数据,
//! 编排基于 docker 容器的深度学习血管分割推理流水线.
//!
//! 该 crate 自身不实现分割网络、重采样算法或等值面提取算法,
//! 这三者均被视为不透明的外部协作方:
//! 分割网络通过固定摘要的 docker 镜像调用, 重采样与表面提取通过
//! "按名调用 + 键值参数表" 的计算模块契约调用.
//! 本库负责其余的一切: 几何规划、强度反转、挂载目录文件约定、
//! 子进程调用与拉取进度解析、以及整条流水线的串联.
//!
//! # 注意
//!
//! 1. 体数据一律以 `(z, h, w)` 顺序组织, 与 [`data`] 模块的约定一致.
//! 2. 在非期望情况下 (编程错误), 程序会直接 panic, 而不会导致内存错误.
//!   外部协作方的失败 (容器、模块、文件系统) 则以 `Result` 形式返回.
//!
//! # 功能概览
//!
//! ### 适配固定推理张量的重采样规划 ✅
//!
//! 推理容器只接受固定尺寸的张量, 因此任意尺寸的输入体数据都要先按
//! `new_spacing[i] = orig_spacing[i] * orig_dim[i] / target_dim[i]`
//! 规划一次重采样; 输出概率图按原间距反向映射回源几何.
//!
//! 实现位于 `mra-vine/src/resample.rs`.
//!
//! ### 反转强度变换 ✅
//!
//! 均匀填充图像减去源图像, 用于在等值面提取前翻转概率图的意义.
//! 值域内该变换是对合的.
//!
//! 实现位于 `mra-vine/src/invert.rs`.
//!
//! ### docker 调用与拉取进度解析 ✅
//!
//! `docker pull` 输出的行级启发式解析 (12 字符层 id + 完成状态串),
//! 以及推理容器的同步调用. 阻塞读取由后台线程 + mpsc 通道承担,
//! 并带有可配置的停滞超时, 不再忙轮询.
//!
//! 实现位于 `mra-vine/src/docker`.
//!
//! ### 挂载目录文件约定 ✅
//!
//! 每次运行前清空挂载目录, 按固定文件名写入重采样结果,
//! 并从固定文件名导入容器输出.
//!
//! 实现位于 `mra-vine/src/staging.rs`.
//!
//! ### 计算模块契约 ✅
//!
//! 按名调用、键值参数表、同步运行至完成. 外部 CLI 可执行文件是
//! 默认实现, 测试以桩模块替代.
//!
//! 实现位于 `mra-vine/src/modules`.
//!
//! ### 流水线编排 ✅
//!
//! 校验 -> 规划 -> 重采样 -> 入目录 -> 推理 -> 导入 -> 还原几何 ->
//! 记录关联 -> 反转 -> 表面提取. 任一外部失败即带类型错误中止,
//! 不做重试.
//!
//! 实现位于 `mra-vine/src/pipeline.rs`.

/// 三维索引, 同时也可一定程度上用作非负整数向量. 顺序为 `(z, h, w)`.
pub type Idx3d = (usize, usize, usize);

/// 三维体素间距, 以毫米为单位. 顺序为 `[z, h, w]`.
pub type MmSpacing = [f64; 3];

/// nii 格式 3D 体数据基础数据结构.
mod data;

pub use data::{MrVolume, NiftiGeom};

pub mod consts;

pub mod docker;
pub mod invert;
pub mod modules;
pub mod pipeline;
pub mod resample;
pub mod scene;
pub mod staging;

pub use pipeline::{VesselSegConfig, VesselSegPipeline};
pub use resample::ResamplePlan;

pub mod prelude;
