//! Execution plan: job instances derived from the graph and matrix expansion

use crate::core::matrix::{expand, ExpansionPolicy, MatrixBinding};
use crate::core::workflow::{Job, Workflow};
use crate::error::LoadError;
use std::collections::BTreeSet;
use std::sync::Arc;

/// One concrete execution of a job under a matrix binding
#[derive(Debug, Clone)]
pub struct JobInstance {
    /// Position in the plan; also the declaration-order tie breaker
    pub index: usize,
    /// `build` or `build (os=linux, ver=1)`
    pub id: String,
    /// Declaration index of the job
    pub job: usize,
    pub matrix: MatrixBinding,
    /// Every instance of every job in `needs`
    pub predecessors: Vec<usize>,
    /// Transitive predecessors, ascending
    pub ancestors: Vec<usize>,
    /// Other instances of the same job
    pub siblings: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub workflow: Arc<Workflow>,
    pub instances: Vec<JobInstance>,
    by_job: Vec<Vec<usize>>,
}

pub fn instance_id(job: &str, binding: &MatrixBinding) -> String {
    if binding.is_empty() {
        job.to_string()
    } else {
        format!("{} ({})", job, binding)
    }
}

impl ExecutionPlan {
    /// Expand every job's matrix and wire instance-level dependencies
    pub fn new(workflow: Arc<Workflow>, policy: ExpansionPolicy) -> Result<Self, LoadError> {
        let mut instances = Vec::new();
        let mut by_job = Vec::with_capacity(workflow.jobs.len());

        for (job_index, job) in workflow.jobs.iter().enumerate() {
            let bindings = expand(&job.matrix, policy);
            if bindings.is_empty() {
                return Err(LoadError::Matrix {
                    job: job.id.clone(),
                    reason: "matrix produces no combinations".to_string(),
                });
            }

            let mut members = Vec::with_capacity(bindings.len());
            for binding in bindings {
                let index = instances.len();
                members.push(index);
                instances.push(JobInstance {
                    index,
                    id: instance_id(&job.id, &binding),
                    job: job_index,
                    matrix: binding,
                    predecessors: Vec::new(),
                    ancestors: Vec::new(),
                    siblings: Vec::new(),
                });
            }
            by_job.push(members);
        }

        for instance in instances.iter_mut() {
            let job = &workflow.jobs[instance.job];
            instance.predecessors = job
                .needs
                .iter()
                .filter_map(|needed| workflow.graph.position(needed))
                .flat_map(|p| by_job[p].iter().copied())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            instance.ancestors = workflow
                .graph
                .ancestors(&job.id)
                .into_iter()
                .filter_map(|a| workflow.graph.position(a))
                .flat_map(|p| by_job[p].iter().copied())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            instance.siblings = by_job[instance.job]
                .iter()
                .copied()
                .filter(|&i| i != instance.index)
                .collect();
        }

        Ok(Self {
            workflow,
            instances,
            by_job,
        })
    }

    pub fn job(&self, instance: usize) -> &Job {
        &self.workflow.jobs[self.instances[instance].job]
    }

    /// Instances of a job, in matrix order
    pub fn instances_of(&self, job_id: &str) -> &[usize] {
        self.workflow
            .graph
            .position(job_id)
            .map(|p| self.by_job[p].as_slice())
            .unwrap_or(&[])
    }

    /// Instances that list `instance` among their predecessors
    pub fn dependents(&self, instance: usize) -> Vec<usize> {
        self.instances
            .iter()
            .filter(|other| other.predecessors.contains(&instance))
            .map(|other| other.index)
            .collect()
    }

    /// Whether `job_id` is a transitive dependency of the instance's job
    pub fn is_ancestor_job(&self, instance: usize, job_id: &str) -> bool {
        let job = self.job(instance);
        self.workflow.graph.ancestors(&job.id).contains(&job_id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
