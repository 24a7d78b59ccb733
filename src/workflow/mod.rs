//! Step orchestrator.
//!
//! A [`Workflow`] is a set of typed steps with declared dependencies. Running
//! it executes the steps in topological order:
//!
//! ```text
//!   wave 0        wave 1                 wave 2
//!  ┌────────┐   ┌──────────────┐       ┌─────────────┐
//!  │profile │──▶│fetchMessages │──┬───▶│identifyTasks│
//!  └────────┘   ├──────────────┤  │    └─────────────┘
//!          └───▶│fetchTasks    │──┘
//!               └──────────────┘
//! ```
//!
//! Steps of one wave are mutually independent and are polled concurrently on
//! the calling task; a wave starts only when the previous one resolved.
//! Outputs are stored only after passing [`StepOutput::validate`].
//!
//! Failure policy:
//! - [`Criticality::Required`] failure aborts the run; remaining steps are
//!   marked [`StepStatus::Skipped`] and never invoked.
//! - [`Criticality::Optional`] failure is tolerated; dependents still run and
//!   read the failed status through [`StepContext::output_or_default`].

mod graph;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};

/// Step identifiers are fixed at compile time.
pub type StepId = &'static str;

/// Lifecycle of a step inside one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Success,
    Failed,
    /// Never dispatched because the run aborted or was cancelled.
    Skipped,
}

/// Whether a step's failure is load-bearing for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    Required,
    Optional,
}

/// Typed output of a step. `validate` is the declared output schema.
pub trait StepOutput: Serialize + Send + Sync + 'static {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// A unit of work in a workflow over trigger type `T`.
#[async_trait]
pub trait Step<T: Send + Sync>: Send + Sync {
    type Output: StepOutput;

    fn id(&self) -> StepId;

    /// Steps that issue non-retryable external effects opt out of the
    /// orchestrator timeout so they are never dropped mid-flight.
    fn timeout_exempt(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &StepContext<'_, T>) -> PipelineResult<Self::Output>;
}

/// Type-erased stored output.
trait StoredOutput: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn to_json(&self) -> serde_json::Value;
}

impl<O: StepOutput> StoredOutput for O {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[async_trait]
trait ErasedStep<T>: Send + Sync {
    async fn run(&self, ctx: &StepContext<'_, T>) -> PipelineResult<Arc<dyn StoredOutput>>;
}

struct StepAdapter<S>(S);

#[async_trait]
impl<T, S> ErasedStep<T> for StepAdapter<S>
where
    T: Send + Sync + 'static,
    S: Step<T>,
{
    async fn run(&self, ctx: &StepContext<'_, T>) -> PipelineResult<Arc<dyn StoredOutput>> {
        let output = self.0.execute(ctx).await?;
        output
            .validate()
            .map_err(|reason| PipelineError::schema(self.0.id(), reason))?;
        Ok(Arc::new(output))
    }
}

struct StepNode<T> {
    id: StepId,
    depends_on: Vec<StepId>,
    criticality: Criticality,
    timeout_exempt: bool,
    step: Box<dyn ErasedStep<T>>,
}

/// Read-only view handed to a step: the trigger plus prior outputs.
pub struct StepContext<'a, T> {
    run_id: Uuid,
    trigger: &'a T,
    outputs: &'a HashMap<StepId, Arc<dyn StoredOutput>>,
    statuses: &'a HashMap<StepId, StepStatus>,
}

impl<'a, T> StepContext<'a, T> {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn trigger(&self) -> &'a T {
        self.trigger
    }

    pub fn status(&self, step: StepId) -> StepStatus {
        self.statuses
            .get(step)
            .copied()
            .unwrap_or(StepStatus::Pending)
    }

    /// Output of a successful step, if it has the requested type.
    pub fn output<O: 'static>(&self, step: StepId) -> Option<&'a O> {
        self.outputs
            .get(step)
            .and_then(|o| o.as_any().downcast_ref::<O>())
    }

    /// Output of a required dependency.
    pub fn require<O: 'static>(&self, step: StepId) -> PipelineResult<&'a O> {
        self.output(step).ok_or_else(|| {
            PipelineError::Configuration(format!(
                "output of step '{}' is unavailable (status: {:?}); is it declared as a dependency?",
                step,
                self.status(step)
            ))
        })
    }

    /// Output of an optional dependency, or `O::default()` if it failed.
    pub fn output_or_default<O: Clone + Default + 'static>(&self, step: StepId) -> O {
        match self.output::<O>(step) {
            Some(o) => o.clone(),
            None => {
                tracing::warn!(
                    "Optional step '{}' unavailable ({:?}), substituting default",
                    step,
                    self.status(step)
                );
                O::default()
            }
        }
    }
}

/// Result of a completed run.
pub struct RunReport {
    pub workflow: &'static str,
    pub run_id: Uuid,
    /// Step statuses in registration order.
    pub statuses: Vec<(StepId, StepStatus)>,
    outputs: HashMap<StepId, Arc<dyn StoredOutput>>,
}

impl RunReport {
    pub fn output<O: 'static>(&self, step: StepId) -> Option<&O> {
        self.outputs
            .get(step)
            .and_then(|o| o.as_any().downcast_ref::<O>())
    }

    pub fn status(&self, step: StepId) -> StepStatus {
        self.statuses
            .iter()
            .find(|(id, _)| *id == step)
            .map(|(_, s)| *s)
            .unwrap_or(StepStatus::Pending)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let steps: serde_json::Map<String, serde_json::Value> = self
            .statuses
            .iter()
            .map(|(id, status)| {
                let output = self
                    .outputs
                    .get(id)
                    .map(|o| o.to_json())
                    .unwrap_or(serde_json::Value::Null);
                (
                    id.to_string(),
                    serde_json::json!({ "status": status, "output": output }),
                )
            })
            .collect();

        serde_json::json!({
            "workflow": self.workflow,
            "runId": self.run_id,
            "steps": steps,
        })
    }
}

/// A declared set of steps over trigger type `T`.
pub struct Workflow<T> {
    name: &'static str,
    nodes: Vec<StepNode<T>>,
    step_timeout: Option<Duration>,
}

impl<T: Send + Sync + 'static> Workflow<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            nodes: Vec::new(),
            step_timeout: None,
        }
    }

    /// Bound every non-exempt step by `timeout`.
    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a step. Rejects duplicate ids and dependency cycles immediately.
    pub fn register<S>(
        &mut self,
        step: S,
        depends_on: &[StepId],
        criticality: Criticality,
    ) -> PipelineResult<&mut Self>
    where
        S: Step<T> + 'static,
    {
        let id = step.id();
        if self.nodes.iter().any(|n| n.id == id) {
            return Err(PipelineError::Configuration(format!(
                "workflow '{}' already has a step '{}'",
                self.name, id
            )));
        }

        let mut edges: Vec<(StepId, Vec<StepId>)> = self
            .nodes
            .iter()
            .map(|n| (n.id, n.depends_on.clone()))
            .collect();
        edges.push((id, depends_on.to_vec()));
        if let Some(node) = graph::find_cycle(&edges) {
            return Err(PipelineError::Configuration(format!(
                "workflow '{}' has a dependency cycle involving step '{}'",
                self.name, node
            )));
        }

        self.nodes.push(StepNode {
            id,
            depends_on: depends_on.to_vec(),
            criticality,
            timeout_exempt: step.timeout_exempt(),
            step: Box::new(StepAdapter(step)),
        });
        Ok(self)
    }

    /// Check that every dependency refers to a registered step.
    pub fn validate(&self) -> PipelineResult<()> {
        for node in &self.nodes {
            for dep in &node.depends_on {
                if !self.nodes.iter().any(|n| n.id == *dep) {
                    return Err(PipelineError::Configuration(format!(
                        "step '{}' depends on undefined step '{}'",
                        node.id, dep
                    )));
                }
            }
        }
        Ok(())
    }

    pub async fn run(&self, trigger: T) -> PipelineResult<RunReport> {
        self.run_with_cancel(trigger, CancellationToken::new()).await
    }

    /// Run the workflow, checking `cancel` before each wave is dispatched.
    pub async fn run_with_cancel(
        &self,
        trigger: T,
        cancel: CancellationToken,
    ) -> PipelineResult<RunReport> {
        self.validate()?;

        let run_id = Uuid::new_v4();
        let mut statuses: HashMap<StepId, StepStatus> = self
            .nodes
            .iter()
            .map(|n| (n.id, StepStatus::Pending))
            .collect();
        let mut outputs: HashMap<StepId, Arc<dyn StoredOutput>> = HashMap::new();

        tracing::info!(
            "Starting workflow '{}' run {} ({} steps)",
            self.name,
            run_id,
            self.nodes.len()
        );

        loop {
            let ready: Vec<&StepNode<T>> = self
                .nodes
                .iter()
                .filter(|n| statuses.get(n.id) == Some(&StepStatus::Pending))
                .filter(|n| self.dependencies_resolved(n, &statuses))
                .collect();

            if ready.is_empty() {
                break;
            }

            if cancel.is_cancelled() {
                tracing::warn!("Workflow '{}' run {} cancelled", self.name, run_id);
                mark_pending_skipped(&mut statuses);
                return Err(PipelineError::Cancelled);
            }

            let results = {
                let ctx = StepContext {
                    run_id,
                    trigger: &trigger,
                    outputs: &outputs,
                    statuses: &statuses,
                };
                let ctx = &ctx;
                join_all(ready.iter().map(|node| async move {
                    (node, self.execute_node(node, ctx).await)
                }))
                .await
            };

            let mut abort: Option<PipelineError> = None;
            for (node, result) in results {
                match result {
                    Ok(output) => {
                        tracing::debug!("Step '{}' succeeded", node.id);
                        statuses.insert(node.id, StepStatus::Success);
                        outputs.insert(node.id, output);
                    }
                    Err(error) => {
                        statuses.insert(node.id, StepStatus::Failed);
                        match node.criticality {
                            Criticality::Optional => {
                                tracing::warn!(
                                    "Optional step '{}' failed, continuing: {}",
                                    node.id,
                                    error
                                );
                            }
                            Criticality::Required => {
                                tracing::error!("Required step '{}' failed: {}", node.id, error);
                                if abort.is_none() {
                                    abort = Some(PipelineError::StepFailed {
                                        step: node.id.to_string(),
                                        source: Box::new(error),
                                    });
                                }
                            }
                        }
                    }
                }
            }

            if let Some(error) = abort {
                mark_pending_skipped(&mut statuses);
                return Err(error);
            }
        }

        tracing::info!("Workflow '{}' run {} completed", self.name, run_id);

        Ok(RunReport {
            workflow: self.name,
            run_id,
            statuses: self
                .nodes
                .iter()
                .map(|n| (n.id, statuses[n.id]))
                .collect(),
            outputs,
        })
    }

    /// A dependency is resolved when it succeeded, or when it is optional and failed.
    fn dependencies_resolved(
        &self,
        node: &StepNode<T>,
        statuses: &HashMap<StepId, StepStatus>,
    ) -> bool {
        node.depends_on.iter().all(|dep| match statuses.get(dep) {
            Some(StepStatus::Success) => true,
            Some(StepStatus::Failed) => self
                .nodes
                .iter()
                .any(|n| n.id == *dep && n.criticality == Criticality::Optional),
            _ => false,
        })
    }

    async fn execute_node(
        &self,
        node: &StepNode<T>,
        ctx: &StepContext<'_, T>,
    ) -> PipelineResult<Arc<dyn StoredOutput>> {
        tracing::debug!("Dispatching step '{}'", node.id);
        match self.step_timeout.filter(|_| !node.timeout_exempt) {
            Some(limit) => match tokio::time::timeout(limit, node.step.run(ctx)).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::external(
                    "orchestrator",
                    format!("step '{}' timed out after {:?}", node.id, limit),
                )),
            },
            None => node.step.run(ctx).await,
        }
    }
}

fn mark_pending_skipped(statuses: &mut HashMap<StepId, StepStatus>) {
    for status in statuses.values_mut() {
        if *status == StepStatus::Pending {
            *status = StepStatus::Skipped;
        }
    }
}
