//! 外部 CLI 形式的计算模块.

use std::path::PathBuf;
use std::process::Command;

use super::{ComputeModule, ModuleError, ModuleParams};

/// 以外部可执行文件实现的计算模块.
///
/// 参数表渲染为 `--key value` 序列传给可执行文件, 同步等待退出.
/// 非零退出码视为失败. 模块自身的输出文件约定由调用方负责.
pub struct ExternalCliModule {
    name: String,
    program: PathBuf,
}

impl ExternalCliModule {
    /// 以模块名与可执行文件路径创建模块.
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
        }
    }

    /// 可执行文件路径.
    #[inline]
    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

impl ComputeModule for ExternalCliModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, params: &ModuleParams) -> Result<(), ModuleError> {
        let output = Command::new(&self.program)
            .args(params.to_cli_args())
            .output()
            .map_err(ModuleError::Launch)?;

        if log::log_enabled!(log::Level::Debug) {
            for line in String::from_utf8_lossy(&output.stdout).lines() {
                log::debug!("{} | {line}", self.name);
            }
        }

        if output.status.success() {
            Ok(())
        } else {
            for line in String::from_utf8_lossy(&output.stderr).lines() {
                log::warn!("{} | {line}", self.name);
            }
            Err(ModuleError::Failed {
                name: self.name.clone(),
                code: output.status.code(),
            })
        }
    }
}
