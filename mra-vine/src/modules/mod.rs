//! 计算模块契约.
//!
//! 宿主平台的计算模块以 "按名调用 + 键值参数表 + 同步运行至完成"
//! 的方式被调用. 本模块复刻该契约: [`ModuleParams`] 承载参数表,
//! [`ComputeModule`] 是模块本体的抽象, [`ModuleRegistry`] 按名分发.
//! 重采样与表面提取都是该契约背后的不透明协作方.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

mod external;

pub use external::ExternalCliModule;

/// 参数表中的单个值.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// 本地文件路径.
    Path(PathBuf),

    /// 整数.
    Int(i64),

    /// 浮点数.
    Float(f64),

    /// 字符串.
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => write!(f, "{}", p.display()),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// 键值参数表. 保持插入顺序, 以便外部 CLI 的参数顺序可预测.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleParams {
    entries: Vec<(String, ParamValue)>,
}

impl ModuleParams {
    /// 创建空参数表.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&mut self, key: &str, value: ParamValue) {
        // 同键覆盖, 位置保持首次插入处.
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.entries.push((key.to_owned(), value)),
        }
    }

    /// 写入路径参数.
    pub fn set_path(&mut self, key: &str, value: impl AsRef<Path>) {
        self.set(key, ParamValue::Path(value.as_ref().to_owned()));
    }

    /// 写入整数参数.
    pub fn set_int(&mut self, key: &str, value: i64) {
        self.set(key, ParamValue::Int(value));
    }

    /// 写入浮点参数.
    pub fn set_float(&mut self, key: &str, value: f64) {
        self.set(key, ParamValue::Float(value));
    }

    /// 写入字符串参数.
    pub fn set_str(&mut self, key: &str, value: impl Into<String>) {
        self.set(key, ParamValue::Str(value.into()));
    }

    /// 读取参数.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// 读取字符串参数. 非 `Str` 变体返回 `None`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(ParamValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// 读取路径参数. 非 `Path` 变体返回 `None`.
    pub fn get_path(&self, key: &str) -> Option<&Path> {
        match self.get(key) {
            Some(ParamValue::Path(p)) => Some(p),
            _ => None,
        }
    }

    /// 参数个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 参数表是否为空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 渲染为 `--key value` 形式的 CLI 参数序列.
    pub fn to_cli_args(&self) -> Vec<OsString> {
        let mut args = Vec::with_capacity(self.entries.len() * 2);
        for (key, value) in &self.entries {
            args.push(OsString::from(format!("--{key}")));
            match value {
                ParamValue::Path(p) => args.push(p.as_os_str().to_owned()),
                other => args.push(OsString::from(other.to_string())),
            }
        }
        args
    }
}

/// 计算模块调用错误.
#[derive(Debug)]
pub enum ModuleError {
    /// 注册表中不存在该名字的模块.
    UnknownModule(String),

    /// 模块进程无法启动.
    Launch(std::io::Error),

    /// 模块运行失败 (非零退出码).
    Failed {
        /// 模块名.
        name: String,
        /// 退出码. 被信号终止时为 `None`.
        code: Option<i32>,
    },

    /// 缺少必要参数.
    MissingParam(&'static str),
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownModule(name) => write!(f, "未注册的计算模块: {name}"),
            Self::Launch(e) => write!(f, "模块进程启动失败: {e}"),
            Self::Failed { name, code } => match code {
                Some(c) => write!(f, "模块 {name} 运行失败, 退出码 {c}"),
                None => write!(f, "模块 {name} 被信号终止"),
            },
            Self::MissingParam(key) => write!(f, "缺少必要参数: {key}"),
        }
    }
}

impl std::error::Error for ModuleError {}

/// 可按名调用的计算模块. 同步运行至完成.
pub trait ComputeModule {
    /// 模块名. 注册表以该名分发.
    fn name(&self) -> &str;

    /// 以参数表 `params` 同步运行模块至完成.
    fn run(&self, params: &ModuleParams) -> Result<(), ModuleError>;
}

/// 计算模块注册表.
#[derive(Default)]
pub struct ModuleRegistry {
    map: HashMap<String, Box<dyn ComputeModule>>,
}

impl ModuleRegistry {
    /// 创建空注册表.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册模块. 同名模块会被替换.
    pub fn register(&mut self, module: Box<dyn ComputeModule>) {
        self.map.insert(module.name().to_owned(), module);
    }

    /// 是否存在名为 `name` 的模块.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// 按名同步调用模块.
    pub fn run(&self, name: &str, params: &ModuleParams) -> Result<(), ModuleError> {
        let module = self
            .map
            .get(name)
            .ok_or_else(|| ModuleError::UnknownModule(name.to_owned()))?;
        log::debug!("module {name} | {} 个参数", params.len());
        module.run(params)
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.map.keys().collect::<Vec<_>>())
            .finish()
    }
}
