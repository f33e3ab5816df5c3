//! docker 挂载目录的文件约定.
//!
//! 容器与宿主之间唯一的数据通道是一个挂载目录: 每次运行前清空,
//! 重采样后的输入按固定文件名写入, 容器把概率图放在固定输出文件名下.
//! 输出只做存在性检查, 不做重试.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::consts::staging as names;
use crate::MrVolume;

/// 挂载目录操作错误.
#[derive(Debug)]
pub enum StagingError {
    /// 底层 I/O 错误.
    Io(io::Error),

    /// nii 文件读写错误.
    Nifti(nifti::NiftiError),

    /// 容器未按约定产出输出文件.
    MissingOutput(PathBuf),
}

impl std::fmt::Display for StagingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "挂载目录 I/O 错误: {e}"),
            Self::Nifti(e) => write!(f, "nii 读写错误: {e}"),
            Self::MissingOutput(p) => {
                write!(f, "容器未产出输出文件: {}", p.display())
            }
        }
    }
}

impl std::error::Error for StagingError {}

/// 挂载目录句柄.
#[derive(Debug, Clone)]
pub struct Staging {
    dir: PathBuf,
}

impl Staging {
    /// 清空并重建挂载目录 `dir`.
    ///
    /// 上一次运行的残留文件会被全部删除.
    pub fn prepare(dir: impl Into<PathBuf>) -> Result<Self, StagingError> {
        let dir = dir.into();
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(StagingError::Io)?;
        }
        fs::create_dir_all(&dir).map_err(StagingError::Io)?;
        Ok(Self { dir })
    }

    /// 默认挂载目录: `{用户主目录}/.mra-vine/staging`,
    /// 无主目录时退回系统临时目录.
    pub fn default_dir() -> PathBuf {
        match dirs::home_dir() {
            Some(mut home) => {
                home.extend([".mra-vine", "staging"]);
                home
            }
            None => std::env::temp_dir().join("mra-vine-staging"),
        }
    }

    /// 挂载目录路径.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 原始输入的暂存路径 (重采样模块的输入).
    #[inline]
    pub fn source_path(&self) -> PathBuf {
        self.dir.join(names::SOURCE_FILE)
    }

    /// 送入容器的输入文件路径 (重采样模块的输出).
    #[inline]
    pub fn input_path(&self) -> PathBuf {
        self.dir.join(names::INPUT_FILE)
    }

    /// 容器输出的概率图路径.
    #[inline]
    pub fn output_path(&self) -> PathBuf {
        self.dir.join(names::OUTPUT_FILE)
    }

    /// 还原回源几何后的概率图路径.
    #[inline]
    pub fn restored_path(&self) -> PathBuf {
        self.dir.join(names::RESTORED_FILE)
    }

    /// 强度反转后的概率图路径 (表面提取模块的输入).
    #[inline]
    pub fn inverted_path(&self) -> PathBuf {
        self.dir.join(names::INVERTED_FILE)
    }

    /// 表面提取模块产出的网格文件路径.
    #[inline]
    pub fn model_path(&self) -> PathBuf {
        self.dir.join(names::MODEL_FILE)
    }

    /// 将原始输入体数据写入暂存路径.
    pub fn stage_source(&self, volume: &MrVolume) -> Result<(), StagingError> {
        volume.save(self.source_path()).map_err(StagingError::Nifti)
    }

    /// 检查容器输出文件是否存在, 存在则返回其路径.
    ///
    /// 容器的成败只能从输出文件是否存在做尽力而为的判断;
    /// 文件不存在即返回 [`StagingError::MissingOutput`].
    pub fn check_output(&self) -> Result<PathBuf, StagingError> {
        let path = self.output_path();
        if path.is_file() {
            Ok(path)
        } else {
            Err(StagingError::MissingOutput(path))
        }
    }
}
