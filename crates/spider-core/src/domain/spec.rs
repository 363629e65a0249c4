//! Job submission specs.
//!
//! A driver describes a job as tasks, dependency edges and data-flow inputs,
//! then turns it into a [`JobPlan`]. Validation happens entirely here, before
//! anything is written, so a rejected job never leaves partial rows behind.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{Result, SpiderError};
use super::graph::DependencyGraph;
use super::ids::{DataId, DriverId, JobId, TaskId};
use super::io::{InputSource, TaskInput, TaskOutput};
use super::job::JobRecord;
use super::state::{JobState, Language};
use super::task::TaskRecord;

/// Width of the `func_name` column.
pub const MAX_FUNC_NAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    pub func_name: String,
    pub language: Language,
    #[serde(default)]
    pub timeout: Option<f32>,
    #[serde(default)]
    pub max_retry: u32,
    #[serde(default)]
    pub inputs: Vec<TaskInput>,
    /// Declared output slots (values empty).
    #[serde(default)]
    pub outputs: Vec<TaskOutput>,
}

impl TaskSpec {
    pub fn new(func_name: impl Into<String>, language: Language) -> Self {
        Self {
            id: TaskId::random(),
            func_name: func_name.into(),
            language,
            timeout: None,
            max_retry: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    pub fn with_timeout(mut self, seconds: f32) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Append an input slot at the next position.
    pub fn with_input(mut self, type_name: impl Into<String>, source: InputSource) -> Self {
        let position = self.inputs.len() as u32;
        self.inputs.push(TaskInput {
            position,
            type_name: type_name.into(),
            source,
        });
        self
    }

    /// Declare an output slot at the next position.
    pub fn with_output(mut self, type_name: impl Into<String>) -> Self {
        let position = self.outputs.len() as u32;
        self.outputs.push(TaskOutput::declared(position, type_name));
        self
    }

    /// Data ids referenced by the inputs.
    pub fn data_inputs(&self) -> impl Iterator<Item = DataId> + '_ {
        self.inputs.iter().filter_map(|input| match input.source {
            InputSource::Data(id) => Some(id),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub client_id: DriverId,
    pub tasks: Vec<TaskSpec>,
    /// `(parent, child)` edges.
    #[serde(default)]
    pub dependencies: Vec<(TaskId, TaskId)>,
    #[serde(default)]
    pub input_tasks: Vec<TaskId>,
    #[serde(default)]
    pub output_tasks: Vec<TaskId>,
}

/// A validated job, ready to be inserted atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct JobPlan {
    pub job: JobRecord,
    pub tasks: Vec<TaskRecord>,
    pub dependencies: Vec<(TaskId, TaskId)>,
}

impl JobPlan {
    pub fn data_inputs(&self) -> impl Iterator<Item = DataId> + '_ {
        self.tasks.iter().flat_map(|t| {
            t.inputs.iter().filter_map(|input| match input.source {
                InputSource::Data(id) => Some(id),
                _ => None,
            })
        })
    }
}

/// Incremental construction of a [`JobSpec`].
///
/// # Example
/// ```ignore
/// let mut job = JobBuilder::new(driver);
/// let a = job.add_task(TaskSpec::new("split", Language::Cpp).with_output("bytes"));
/// let b = job.add_task(TaskSpec::new("count", Language::Cpp)
///     .with_input("bytes", InputSource::TaskOutput { task_id: a, position: 0 }));
/// job.depends(a, b);
/// let spec = job.build();
/// ```
#[derive(Debug, Clone)]
pub struct JobBuilder {
    spec: JobSpec,
}

impl JobBuilder {
    pub fn new(client_id: DriverId) -> Self {
        Self {
            spec: JobSpec {
                client_id,
                tasks: Vec::new(),
                dependencies: Vec::new(),
                input_tasks: Vec::new(),
                output_tasks: Vec::new(),
            },
        }
    }

    pub fn add_task(&mut self, task: TaskSpec) -> TaskId {
        let id = task.id;
        self.spec.tasks.push(task);
        id
    }

    pub fn depends(&mut self, parent: TaskId, child: TaskId) -> &mut Self {
        self.spec.dependencies.push((parent, child));
        self
    }

    pub fn input_task(&mut self, task: TaskId) -> &mut Self {
        self.spec.input_tasks.push(task);
        self
    }

    pub fn output_task(&mut self, task: TaskId) -> &mut Self {
        self.spec.output_tasks.push(task);
        self
    }

    pub fn build(self) -> JobSpec {
        self.spec
    }
}

impl JobSpec {
    /// Validate the graph and produce the rows to insert.
    pub fn into_plan(self, job_id: JobId, now: DateTime<Utc>) -> Result<JobPlan> {
        if self.tasks.is_empty() {
            return Err(SpiderError::Validation("job has no tasks".into()));
        }

        let mut by_id: HashMap<TaskId, &TaskSpec> = HashMap::new();
        for task in &self.tasks {
            validate_task(task)?;
            if by_id.insert(task.id, task).is_some() {
                return Err(SpiderError::Structural(format!("duplicate task {}", task.id)));
            }
        }

        let mut graph = DependencyGraph::new();
        let mut dependencies = Vec::new();
        for &(parent, child) in &self.dependencies {
            for id in [parent, child] {
                if !by_id.contains_key(&id) {
                    return Err(SpiderError::Structural(format!(
                        "dependency references unknown task {id}"
                    )));
                }
            }
            if parent == child {
                return Err(SpiderError::Structural(format!("{parent} depends on itself")));
            }
            if graph.add_dependency(parent, child) {
                dependencies.push((parent, child));
            }
        }

        if let Some(cycle) = graph.detect_cycle() {
            let path: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            return Err(SpiderError::Structural(format!(
                "dependency cycle: {}",
                path.join(" -> ")
            )));
        }

        for task in &self.tasks {
            for input in &task.inputs {
                let InputSource::TaskOutput { task_id, position } = input.source else {
                    continue;
                };
                let Some(producer) = by_id.get(&task_id) else {
                    return Err(SpiderError::Structural(format!(
                        "{} reads output of unknown task {task_id}",
                        task.id
                    )));
                };
                if !producer.outputs.iter().any(|o| o.position == position) {
                    return Err(SpiderError::Structural(format!(
                        "{} reads undeclared output {position} of {task_id}",
                        task.id
                    )));
                }
                if !graph.contains_edge(task_id, task.id) {
                    return Err(SpiderError::Structural(format!(
                        "{} reads output of {task_id} without depending on it",
                        task.id
                    )));
                }
            }
        }

        for id in self.input_tasks.iter().chain(&self.output_tasks) {
            if !by_id.contains_key(id) {
                return Err(SpiderError::Structural(format!(
                    "job input/output references unknown task {id}"
                )));
            }
        }

        let tasks = self
            .tasks
            .into_iter()
            .map(|spec| {
                let mut record = TaskRecord::new(spec.id, job_id, spec.func_name, spec.language);
                record.timeout = spec.timeout;
                record.max_retry = spec.max_retry;
                record.inputs = spec.inputs;
                record.outputs = spec.outputs;
                record
            })
            .collect();

        Ok(JobPlan {
            job: JobRecord {
                id: job_id,
                client_id: self.client_id,
                creation_time: now,
                state: JobState::Running,
                input_tasks: self.input_tasks,
                output_tasks: self.output_tasks,
            },
            tasks,
            dependencies,
        })
    }
}

fn validate_task(task: &TaskSpec) -> Result<()> {
    if task.func_name.is_empty() || task.func_name.len() > MAX_FUNC_NAME_LEN {
        return Err(SpiderError::Validation(format!(
            "function name of {} must be 1..={MAX_FUNC_NAME_LEN} bytes",
            task.id
        )));
    }
    if let Some(timeout) = task.timeout
        && !(timeout.is_finite() && timeout > 0.0)
    {
        return Err(SpiderError::Validation(format!(
            "timeout of {} must be a positive number of seconds",
            task.id
        )));
    }
    let mut positions = HashSet::new();
    if !task.inputs.iter().all(|i| positions.insert(i.position)) {
        return Err(SpiderError::Validation(format!(
            "duplicate input position on {}",
            task.id
        )));
    }
    positions.clear();
    if !task.outputs.iter().all(|o| positions.insert(o.position)) {
        return Err(SpiderError::Validation(format!(
            "duplicate output position on {}",
            task.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskState;

    fn plan(spec: JobSpec) -> Result<JobPlan> {
        spec.into_plan(JobId::random(), Utc::now())
    }

    fn chain() -> (JobBuilder, TaskId, TaskId) {
        let mut job = JobBuilder::new(DriverId::random());
        let a = job.add_task(TaskSpec::new("produce", Language::Cpp).with_output("int"));
        let b = job.add_task(TaskSpec::new("consume", Language::Cpp).with_input(
            "int",
            InputSource::TaskOutput {
                task_id: a,
                position: 0,
            },
        ));
        (job, a, b)
    }

    #[test]
    fn valid_chain_becomes_pending_rows() {
        let (mut job, a, b) = chain();
        job.depends(a, b).output_task(b);
        let plan = plan(job.build()).unwrap();
        assert_eq!(plan.tasks.len(), 2);
        assert!(plan.tasks.iter().all(|t| t.state == TaskState::Pending));
        assert_eq!(plan.dependencies, vec![(a, b)]);
        assert_eq!(plan.job.output_tasks, vec![b]);
        assert_eq!(plan.job.state, JobState::Running);
    }

    #[test]
    fn duplicate_edges_collapse() {
        let (mut job, a, b) = chain();
        job.depends(a, b).depends(a, b);
        assert_eq!(plan(job.build()).unwrap().dependencies.len(), 1);
    }

    #[test]
    fn cycles_are_rejected_before_any_row_exists() {
        let (mut job, a, b) = chain();
        job.depends(a, b).depends(b, a);
        let err = plan(job.build()).unwrap_err();
        assert!(matches!(err, SpiderError::Structural(msg) if msg.contains("cycle")));
    }

    #[test]
    fn data_flow_must_be_covered_by_dependencies() {
        let (job, _, _) = chain();
        let err = plan(job.build()).unwrap_err();
        assert!(matches!(err, SpiderError::Structural(msg) if msg.contains("without depending")));
    }

    #[test]
    fn undeclared_output_positions_are_rejected() {
        let mut job = JobBuilder::new(DriverId::random());
        let a = job.add_task(TaskSpec::new("produce", Language::Cpp));
        let b = job.add_task(TaskSpec::new("consume", Language::Cpp).with_input(
            "int",
            InputSource::TaskOutput {
                task_id: a,
                position: 3,
            },
        ));
        job.depends(a, b);
        assert!(matches!(plan(job.build()), Err(SpiderError::Structural(_))));
    }

    #[test]
    fn unknown_tasks_in_edges_are_rejected() {
        let (mut job, a, _) = chain();
        job.depends(a, TaskId::random());
        assert!(matches!(plan(job.build()), Err(SpiderError::Structural(_))));
    }

    #[test]
    fn self_edges_are_rejected() {
        let (mut job, a, _) = chain();
        job.depends(a, a);
        assert!(matches!(plan(job.build()), Err(SpiderError::Structural(_))));
    }

    #[test]
    fn empty_jobs_are_rejected() {
        let job = JobBuilder::new(DriverId::random());
        assert!(matches!(plan(job.build()), Err(SpiderError::Validation(_))));
    }

    #[test]
    fn bad_timeouts_and_names_are_rejected() {
        let mut job = JobBuilder::new(DriverId::random());
        job.add_task(TaskSpec::new("f", Language::Python).with_timeout(f32::NAN));
        assert!(matches!(plan(job.build()), Err(SpiderError::Validation(_))));

        let mut job = JobBuilder::new(DriverId::random());
        job.add_task(TaskSpec::new("x".repeat(65), Language::Python));
        assert!(matches!(plan(job.build()), Err(SpiderError::Validation(_))));
    }

    #[test]
    fn spec_roundtrips_through_json() {
        let (mut job, a, b) = chain();
        job.depends(a, b);
        let spec = job.build();
        let json = serde_json::to_string(&spec).unwrap();
        let back: JobSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
