//! Out-of-process execution wrapper.
//!
//! A worker owns the single live engine and replays generate tasks against
//! it, streaming progress messages and a terminal payload back to the
//! caller. Two variants share this module's task processing: a cooperative
//! thread ([`ThreadWorker`]) and a separate OS process ([`ProcessWorker`]
//! driving the `backend` binary over stdio). Tasks are strictly FIFO;
//! progress messages always precede the terminal message of their task; a
//! failed task ends the worker loop (fail-stop, not fail-safe).

mod process;
mod thread;

#[cfg(test)]
mod tests_worker;

pub use process::ProcessWorker;
pub use thread::ThreadWorker;

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::engine::{BuildError, EngineOptions, EntityMapEntry, GeomEngine};
use crate::entity::{EntityId, GeometryResult};
use crate::kernel::{MeshData, OccKernel};
use crate::objects::ObjectTable;
use crate::sequence::{run_sequence, Operation};

/// Messages on the result channel. For one task, any number of `Progress`
/// messages precede exactly one `Done` or `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMessage {
    Progress(String),
    Done(Box<BuildOutput>),
    Failed(String),
}

/// Messages on the task channel. `Shutdown` is only honored between tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Generate(Box<GenerateTask>),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateTask {
    pub model_name: String,
    pub steps: Vec<Operation>,
    /// Replay starts here; earlier steps are assumed already applied to the
    /// persisted table below.
    #[serde(default)]
    pub start_index: usize,
    /// Named-object table carried over from the previous task.
    #[serde(default)]
    pub objects: ObjectTable,
    /// Run the fragment + export + reload finalization pass.
    #[serde(default)]
    pub finalize: bool,
    /// Run the adaptive preview-mesh pipeline.
    #[serde(default)]
    pub preview_mesh: bool,
    /// Adjust engine options; the engine itself is built once per worker.
    #[serde(default)]
    pub options: Option<EngineOptions>,
}

/// Terminal payload of a successful task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildOutput {
    pub objects: ObjectTable,
    pub masked_vertices: Vec<EntityId>,
    pub brep_path: Option<PathBuf>,
    pub entity_map: Option<Vec<EntityMapEntry>>,
    pub mesh: Option<MeshData>,
}

/// Errors of the worker plumbing itself (not of the geometry build).
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker channel closed")]
    Disconnected,

    #[error("failed to spawn worker process: {0}")]
    Spawn(String),

    #[error("worker protocol error: {0}")]
    Protocol(String),

    #[error("worker i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Flatten an error and its sources into the free-text form delivered with
/// a `Failed` message.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\ncaused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// Process one generate task. The engine is constructed lazily exactly once
/// per worker lifetime; later tasks only adjust its options.
pub fn process_generate(
    engine_slot: &mut Option<GeomEngine>,
    kernel_factory: &mut dyn FnMut() -> Box<dyn OccKernel>,
    task: GenerateTask,
    emit: &mut dyn FnMut(WorkerMessage),
) -> Result<BuildOutput, BuildError> {
    let mut task = task;
    if let Some(options) = task.options.take() {
        match engine_slot.as_mut() {
            Some(engine) => engine.set_options(options),
            None => {
                *engine_slot = Some(GeomEngine::new(kernel_factory(), options, &task.model_name)?);
            }
        }
    }
    if engine_slot.is_none() {
        *engine_slot = Some(GeomEngine::new(
            kernel_factory(),
            EngineOptions::default(),
            &task.model_name,
        )?);
    }
    let Some(engine) = engine_slot.as_mut() else {
        return Err(BuildError::Unsupported("worker engine unavailable".into()));
    };

    let mut objects = task.objects;
    {
        let mut progress = |msg: &str| emit(WorkerMessage::Progress(msg.to_string()));
        run_sequence(
            engine,
            &mut objects,
            &task.steps,
            task.start_index,
            &mut progress,
        )?;
    }

    let (brep_path, entity_map) = if task.finalize {
        emit(WorkerMessage::Progress("finalizing model".to_string()));
        let (path, mapping) = engine.finalize(&task.model_name)?;
        remap_table(&mut objects, &mapping);
        (Some(path), Some(mapping))
    } else {
        (None, None)
    };

    let mesh = if task.preview_mesh {
        emit(WorkerMessage::Progress("generating preview mesh".to_string()));
        Some(engine.generate_preview_mesh()?)
    } else {
        None
    };

    info!(
        objects = objects.len(),
        finalized = brep_path.is_some(),
        meshed = mesh.is_some(),
        "generate task complete"
    );
    Ok(BuildOutput {
        masked_vertices: engine.masked_vertices().to_vec(),
        objects,
        brep_path,
        entity_map,
        mesh,
    })
}

/// Rewrite table entries through the renumbering mapping. Entries the
/// mapping does not cover are left untouched (the mapping is best effort).
fn remap_table(objects: &mut ObjectTable, mapping: &[EntityMapEntry]) {
    let by_dim: HashMap<(i32, i32), i32> = mapping
        .iter()
        .map(|m| ((m.dim, m.old_tag), m.new_tag))
        .collect();
    let remap_id = |id: EntityId| -> EntityId {
        match id.dim() {
            Some(dim) => match by_dim.get(&(dim, id.tag())) {
                Some(&new_tag) => match id {
                    EntityId::Vertex(_) => EntityId::Vertex(new_tag),
                    EntityId::Curve(_) => EntityId::Curve(new_tag),
                    EntityId::Surface(_) => EntityId::Surface(new_tag),
                    EntityId::Volume(_) => EntityId::Volume(new_tag),
                    other => other,
                },
                None => id,
            },
            None => id,
        }
    };
    let remapped: Vec<(String, GeometryResult)> = objects
        .iter()
        .map(|(key, result)| {
            let new = match *result {
                GeometryResult::Entity(id) => GeometryResult::Entity(remap_id(id)),
                GeometryResult::Polygon {
                    surface,
                    boundary,
                    mesh_size,
                } => GeometryResult::Polygon {
                    surface: remap_id(surface),
                    boundary,
                    mesh_size,
                },
            };
            (key.clone(), new)
        })
        .collect();
    for (key, result) in remapped {
        objects.insert(key, result);
    }
}
