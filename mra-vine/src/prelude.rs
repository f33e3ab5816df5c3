//! 常用项的一站式导入.

pub use crate::consts;
pub use crate::docker::{DockerCli, DockerError, ImageRef, InferenceEngine};
pub use crate::invert::{invert, invert_in_place};
pub use crate::modules::{
    ComputeModule, ExternalCliModule, ModuleError, ModuleParams, ModuleRegistry,
};
pub use crate::pipeline::{
    PipelineError, Progress, Stage, VesselSegConfig, VesselSegPipeline, RESAMPLE_MODULE,
    SURFACE_MODULE,
};
pub use crate::resample::ResamplePlan;
pub use crate::scene::{ModelNode, NodeId, Scene, VolumeNode};
pub use crate::staging::{Staging, StagingError};
pub use crate::{Idx3d, MmSpacing, MrVolume, NiftiGeom};
