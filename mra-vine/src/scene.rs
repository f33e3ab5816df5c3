//! 极简节点场景.
//!
//! 宿主平台的场景图在本库里收敛为一个轻量注册表: 体积节点承载
//! [`MrVolume`], 模型节点承载表面网格文件路径, 两者都可携带字符串属性.
//! 流水线只通过节点 id 与场景交互.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::MrVolume;

/// 场景节点 id. 在单个 [`Scene`] 内唯一.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// 3D 体积节点. 可能尚未填充实际数据.
#[derive(Debug, Clone)]
pub struct VolumeNode {
    name: String,
    volume: Option<MrVolume>,
    attrs: HashMap<String, String>,
}

impl VolumeNode {
    /// 节点名.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 节点承载的体数据, 未填充时为 `None`.
    #[inline]
    pub fn volume(&self) -> Option<&MrVolume> {
        self.volume.as_ref()
    }

    /// 是否已有实际数据.
    #[inline]
    pub fn has_image_data(&self) -> bool {
        self.volume.is_some()
    }

    /// 用 `volume` 替换节点数据, 返回旧数据.
    pub fn set_volume(&mut self, volume: MrVolume) -> Option<MrVolume> {
        self.volume.replace(volume)
    }

    /// 读取属性.
    #[inline]
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// 写入属性, 返回旧值.
    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) -> Option<String> {
        self.attrs.insert(key.to_owned(), value.into())
    }
}

/// 3D 表面模型节点. 网格本体由外部表面提取模块产出,
/// 节点只记录网格文件的本地路径.
#[derive(Debug, Clone)]
pub struct ModelNode {
    name: String,
    mesh_path: Option<PathBuf>,
    attrs: HashMap<String, String>,
}

impl ModelNode {
    /// 节点名.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 网格文件路径, 未产出时为 `None`.
    #[inline]
    pub fn mesh_path(&self) -> Option<&std::path::Path> {
        self.mesh_path.as_deref()
    }

    /// 记录网格文件路径, 返回旧值.
    pub fn set_mesh_path(&mut self, path: PathBuf) -> Option<PathBuf> {
        self.mesh_path.replace(path)
    }

    /// 读取属性.
    #[inline]
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// 写入属性, 返回旧值.
    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) -> Option<String> {
        self.attrs.insert(key.to_owned(), value.into())
    }
}

/// 节点校验错误.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum NodeCheckError {
    /// 所引用的体积节点不存在.
    MissingVolume(NodeId),

    /// 所引用的模型节点不存在.
    MissingModel(NodeId),

    /// 体积节点存在但没有实际数据.
    EmptyVolume(NodeId),

    /// 输入与输出是同一个节点. 应为输出另建节点.
    SameNode(NodeId),
}

impl fmt::Display for NodeCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingVolume(id) => write!(f, "体积节点 {id} 不存在"),
            Self::MissingModel(id) => write!(f, "模型节点 {id} 不存在"),
            Self::EmptyVolume(id) => write!(f, "体积节点 {id} 没有图像数据"),
            Self::SameNode(id) => write!(f, "输入与输出为同一节点 {id}"),
        }
    }
}

impl std::error::Error for NodeCheckError {}

/// 极简场景: 体积节点与模型节点的注册表.
#[derive(Debug, Default)]
pub struct Scene {
    volumes: HashMap<NodeId, VolumeNode>,
    models: HashMap<NodeId, ModelNode>,
    next: u32,
}

impl Scene {
    /// 创建空场景.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }

    /// 新建空体积节点.
    pub fn add_volume(&mut self, name: impl Into<String>) -> NodeId {
        let id = self.next_id();
        self.volumes.insert(
            id,
            VolumeNode {
                name: name.into(),
                volume: None,
                attrs: HashMap::new(),
            },
        );
        id
    }

    /// 新建体积节点并填充数据.
    pub fn add_volume_with(&mut self, name: impl Into<String>, volume: MrVolume) -> NodeId {
        let id = self.add_volume(name);
        // 刚插入的节点必然存在, 可直接 unwrap.
        self.volumes.get_mut(&id).unwrap().volume = Some(volume);
        id
    }

    /// 新建空模型节点.
    pub fn add_model(&mut self, name: impl Into<String>) -> NodeId {
        let id = self.next_id();
        self.models.insert(
            id,
            ModelNode {
                name: name.into(),
                mesh_path: None,
                attrs: HashMap::new(),
            },
        );
        id
    }

    /// 获取体积节点.
    #[inline]
    pub fn volume(&self, id: NodeId) -> Option<&VolumeNode> {
        self.volumes.get(&id)
    }

    /// 获取可变体积节点.
    #[inline]
    pub fn volume_mut(&mut self, id: NodeId) -> Option<&mut VolumeNode> {
        self.volumes.get_mut(&id)
    }

    /// 获取模型节点.
    #[inline]
    pub fn model(&self, id: NodeId) -> Option<&ModelNode> {
        self.models.get(&id)
    }

    /// 获取可变模型节点.
    #[inline]
    pub fn model_mut(&mut self, id: NodeId) -> Option<&mut ModelNode> {
        self.models.get_mut(&id)
    }

    /// 体积节点个数.
    #[inline]
    pub fn volume_len(&self) -> usize {
        self.volumes.len()
    }

    /// 模型节点个数.
    #[inline]
    pub fn model_len(&self) -> usize {
        self.models.len()
    }
}

/// 校验一次流水线运行所需的节点.
///
/// 1. `input` 必须存在且有图像数据;
/// 2. `prob_out` 必须存在, 且不得与 `input` 为同一节点;
/// 3. `model_out` 必须存在.
pub fn check_run_nodes(
    scene: &Scene,
    input: NodeId,
    prob_out: NodeId,
    model_out: NodeId,
) -> Result<(), NodeCheckError> {
    let input_node = scene
        .volume(input)
        .ok_or(NodeCheckError::MissingVolume(input))?;
    if !input_node.has_image_data() {
        return Err(NodeCheckError::EmptyVolume(input));
    }
    if prob_out == input {
        return Err(NodeCheckError::SameNode(input));
    }
    scene
        .volume(prob_out)
        .ok_or(NodeCheckError::MissingVolume(prob_out))?;
    scene
        .model(model_out)
        .ok_or(NodeCheckError::MissingModel(model_out))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MrVolume;

    fn tiny_volume() -> MrVolume {
        MrVolume::synthetic((2, 2, 2), [1.0, 1.0, 1.0], 0.0)
    }

    #[test]
    fn test_check_accepts_valid_nodes() {
        let mut scene = Scene::new();
        let input = scene.add_volume_with("mra", tiny_volume());
        let prob = scene.add_volume("probmap");
        let model = scene.add_model("vessels");
        assert_eq!(check_run_nodes(&scene, input, prob, model), Ok(()));
    }

    #[test]
    fn test_check_rejects_same_node() {
        let mut scene = Scene::new();
        let input = scene.add_volume_with("mra", tiny_volume());
        let model = scene.add_model("vessels");
        assert_eq!(
            check_run_nodes(&scene, input, input, model),
            Err(NodeCheckError::SameNode(input))
        );
    }

    #[test]
    fn test_check_rejects_empty_input() {
        let mut scene = Scene::new();
        let input = scene.add_volume("mra");
        let prob = scene.add_volume("probmap");
        let model = scene.add_model("vessels");
        assert_eq!(
            check_run_nodes(&scene, input, prob, model),
            Err(NodeCheckError::EmptyVolume(input))
        );
    }

    #[test]
    fn test_check_rejects_missing_nodes() {
        let mut scene = Scene::new();
        let input = scene.add_volume_with("mra", tiny_volume());
        let prob = scene.add_volume("probmap");
        let model = scene.add_model("vessels");

        // 另一场景里分配的更大 id 在本场景中必然不存在.
        let missing = {
            let mut s = Scene::new();
            for _ in 0..16 {
                s.add_volume("pad");
            }
            s.add_volume("far")
        };
        assert_eq!(
            check_run_nodes(&scene, missing, prob, model),
            Err(NodeCheckError::MissingVolume(missing))
        );
        assert_eq!(
            check_run_nodes(&scene, input, missing, model),
            Err(NodeCheckError::MissingVolume(missing))
        );
    }

    #[test]
    fn test_attrs_round_trip() {
        let mut scene = Scene::new();
        let id = scene.add_volume("mra");
        let node = scene.volume_mut(id).unwrap();
        assert_eq!(node.set_attr("vesselseg.probmap", "node-3"), None);
        assert_eq!(node.attr("vesselseg.probmap"), Some("node-3"));
        assert_eq!(
            node.set_attr("vesselseg.probmap", "node-4"),
            Some("node-3".to_owned())
        );
    }
}
