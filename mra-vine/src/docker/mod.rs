//! docker 容器运行时调用.
//!
//! 负责定位 docker 可执行文件、拉取固定摘要的推理镜像、以及同步运行
//! 推理容器. 子进程输出由后台线程经 mpsc 通道逐行转交, 主调线程
//! 带停滞超时地接收; 挂起的子进程会被杀掉并报错, 而不是永久阻塞.

use std::fmt;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use once_cell::sync::Lazy;

use crate::consts::infer;

pub mod progress;

use progress::PullProgress;

/// 默认的输出停滞超时. 超过该时长没有任何新输出行即判定挂起.
const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(300);

/// `name@digest` 形式的镜像引用.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    name: String,
    digest: String,
}

impl ImageRef {
    /// 以镜像名和摘要创建引用.
    pub fn new(name: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            digest: digest.into(),
        }
    }

    /// 固定摘要的血管分割推理镜像.
    #[inline]
    pub fn pinned_vessel_seg() -> Self {
        Self::new(infer::IMAGE_NAME, infer::IMAGE_DIGEST)
    }

    /// 完整引用串, 即 `name@digest`.
    pub fn reference(&self) -> String {
        format!("{}@{}", self.name, self.digest)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.digest)
    }
}

/// docker 调用错误.
#[derive(Debug)]
pub enum DockerError {
    /// 未能在默认安装路径找到 docker 可执行文件.
    NotFound,

    /// 子进程无法启动.
    Launch(io::Error),

    /// 子进程输出停滞超时, 已被杀掉.
    Stalled(Duration),

    /// 子进程以非零退出码结束. 被信号终止时为 `None`.
    Exit(Option<i32>),

    /// 其他底层 I/O 错误.
    Io(io::Error),
}

impl fmt::Display for DockerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "未找到 docker 可执行文件"),
            Self::Launch(e) => write!(f, "docker 进程启动失败: {e}"),
            Self::Stalled(d) => write!(f, "docker 输出停滞超过 {} 秒, 已中止", d.as_secs()),
            Self::Exit(Some(c)) => write!(f, "docker 以退出码 {c} 结束"),
            Self::Exit(None) => write!(f, "docker 被信号终止"),
            Self::Io(e) => write!(f, "docker I/O 错误: {e}"),
        }
    }
}

impl std::error::Error for DockerError {}

/// 推理引擎抽象. 生产实现为 [`DockerCli`], 测试以桩实现替代.
pub trait InferenceEngine {
    /// 拉取镜像. 进度比值 (0.0 ..= 1.0) 经 `on_ratio` 通知.
    fn pull(&self, image: &ImageRef, on_ratio: &mut dyn FnMut(f64)) -> Result<(), DockerError>;

    /// 以 `host_dir` 为挂载目录同步运行推理容器至完成.
    fn run_inference(&self, image: &ImageRef, host_dir: &Path) -> Result<(), DockerError>;
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "macos")] {
        const DEFAULT_DOCKER: &str = "/usr/local/bin/docker";
    } else if #[cfg(windows)] {
        const DEFAULT_DOCKER: &str = "C:/Program Files/Docker/Docker/resources/bin/docker.exe";
    } else {
        const DEFAULT_DOCKER: &str = "/usr/bin/docker";
    }
}

/// 默认安装路径探测结果. 文件系统探测只做一次.
static LOCATED_DOCKER: Lazy<Option<PathBuf>> = Lazy::new(|| {
    // 若同目录装有 nvidia-docker, 则优先使用它.
    let nvidia = DEFAULT_DOCKER.replace("bin/docker", "bin/nvidia-docker");
    let nvidia = Path::new(&nvidia);
    if nvidia.is_file() {
        return Some(nvidia.to_owned());
    }
    let default = Path::new(DEFAULT_DOCKER);
    default.is_file().then(|| default.to_owned())
});

/// docker CLI 入口.
#[derive(Debug, Clone)]
pub struct DockerCli {
    path: PathBuf,
    stall_timeout: Duration,
}

impl DockerCli {
    /// 以给定可执行文件路径创建入口.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stall_timeout: DEFAULT_STALL_TIMEOUT,
        }
    }

    /// 在各平台默认安装路径探测 docker (nvidia-docker 优先).
    /// 未找到时返回 `Err(DockerError::NotFound)`.
    pub fn locate() -> Result<Self, DockerError> {
        LOCATED_DOCKER
            .as_deref()
            .map(Self::new)
            .ok_or(DockerError::NotFound)
    }

    /// 重设输出停滞超时.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// 可执行文件路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 拉取镜像, 逐行解析进度.
    pub fn pull_image(
        &self,
        image: &ImageRef,
        on_ratio: &mut dyn FnMut(f64),
    ) -> Result<(), DockerError> {
        log::info!("docker pull {image} (约 {} MB)", infer::IMAGE_SIZE_MB);
        let mut cmd = Command::new(&self.path);
        cmd.arg("pull").arg(image.reference());

        let mut parser = PullProgress::new();
        self.stream_lines(cmd, &mut |line| {
            log::debug!("docker pull | {line}");
            if let Some(ratio) = parser.feed(line) {
                on_ratio(ratio);
            }
        })
    }

    /// 同步运行推理容器. `host_dir` 挂载到容器内固定数据目录.
    pub fn run_container(&self, image: &ImageRef, host_dir: &Path) -> Result<(), DockerError> {
        let mount = format!("{}:{}", host_dir.display(), infer::MOUNT_POINT);
        log::info!("docker run {image}, 挂载 {mount}");

        let mut cmd = Command::new(&self.path);
        cmd.args(["run", "-t", "-v"])
            .arg(mount)
            .arg(image.reference())
            .args(["python3", infer::NET_RUN, "inference"])
            .args(["-a", infer::APP_CLASS])
            .args(["-c", infer::APP_CONFIG]);

        self.stream_lines(cmd, &mut |line| {
            log::info!("inference | {line}");
        })
    }

    /// 启动 `cmd` 并逐行消费其 stdout.
    ///
    /// 阻塞读取由后台线程承担, 主调线程带停滞超时接收; 超时即杀掉
    /// 子进程并返回 `Stalled`.
    fn stream_lines(
        &self,
        mut cmd: Command,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<(), DockerError> {
        cmd.stdout(Stdio::piped()).stderr(Stdio::null());
        let mut child = cmd.spawn().map_err(DockerError::Launch)?;

        // stdout 已配置为 piped, 此处必然存在, 可直接 unwrap.
        let stdout = child.stdout.take().unwrap();

        let (tx, rx) = mpsc::channel::<String>();
        let reader = thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        loop {
            match rx.recv_timeout(self.stall_timeout) {
                Ok(line) => on_line(&line),

                // 通道关闭即 stdout EOF, 子进程随后退出.
                Err(RecvTimeoutError::Disconnected) => break,

                Err(RecvTimeoutError::Timeout) => {
                    log::warn!("docker 输出停滞, 杀掉子进程");
                    let _ = child.kill();
                    let _ = child.wait();
                    // 管道写端可能被子进程的后代继续持有, 读取线程要到
                    // EOF (或下一行发送失败) 才会结束. 此处不可 join,
                    // 否则会一直等到整棵挂起的进程树退出; 丢弃句柄,
                    // 让其随接收端关闭自行了结.
                    drop(reader);
                    return Err(DockerError::Stalled(self.stall_timeout));
                }
            }
        }

        // reader 线程在 EOF 后立即结束; join 失败说明其 panic 了.
        reader.join().expect("stdout 读取线程异常");
        let status = child.wait().map_err(DockerError::Io)?;
        if status.success() {
            Ok(())
        } else {
            Err(DockerError::Exit(status.code()))
        }
    }
}

impl InferenceEngine for DockerCli {
    fn pull(&self, image: &ImageRef, on_ratio: &mut dyn FnMut(f64)) -> Result<(), DockerError> {
        self.pull_image(image, on_ratio)
    }

    fn run_inference(&self, image: &ImageRef, host_dir: &Path) -> Result<(), DockerError> {
        self.run_container(image, host_dir)
    }
}
