//! Job dependency graph
//!
//! Built once at load time from each job's `needs`. Construction rejects
//! unknown references and cycles, so everything downstream can assume a DAG.

use crate::error::LoadError;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Job ids in declaration order
    jobs: Vec<String>,
    index: HashMap<String, usize>,
    predecessors: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    layer: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl DependencyGraph {
    /// Build the graph from `(job id, needs)` pairs in declaration order
    pub fn build<'a, I>(jobs: I) -> Result<Self, LoadError>
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let entries: Vec<(&str, &[String])> = jobs.into_iter().collect();

        let mut index = HashMap::with_capacity(entries.len());
        for (i, (id, _)) in entries.iter().enumerate() {
            if index.insert(id.to_string(), i).is_some() {
                return Err(LoadError::DuplicateJob(id.to_string()));
            }
        }

        let mut predecessors = vec![Vec::new(); entries.len()];
        let mut dependents = vec![Vec::new(); entries.len()];
        for (i, (id, needs)) in entries.iter().enumerate() {
            for needed in needs.iter() {
                let &p = index.get(needed).ok_or_else(|| LoadError::UnknownJob {
                    job: id.to_string(),
                    needed: needed.clone(),
                })?;
                if !predecessors[i].contains(&p) {
                    predecessors[i].push(p);
                    dependents[p].push(i);
                }
            }
        }

        let mut graph = Self {
            jobs: entries.iter().map(|(id, _)| id.to_string()).collect(),
            index,
            predecessors,
            dependents,
            layer: Vec::new(),
        };
        graph.check_cycles()?;
        graph.layer = graph.compute_layers();
        Ok(graph)
    }

    fn check_cycles(&self) -> Result<(), LoadError> {
        let mut marks = vec![Mark::Unvisited; self.jobs.len()];
        let mut path = Vec::new();
        for start in 0..self.jobs.len() {
            if marks[start] == Mark::Unvisited {
                self.visit(start, &mut marks, &mut path)?;
            }
        }
        Ok(())
    }

    fn visit(&self, node: usize, marks: &mut [Mark], path: &mut Vec<usize>) -> Result<(), LoadError> {
        marks[node] = Mark::InProgress;
        path.push(node);

        for &next in &self.predecessors[node] {
            match marks[next] {
                Mark::InProgress => {
                    let start = path.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|&n| self.jobs[n].clone()).collect();
                    cycle.push(self.jobs[next].clone());
                    return Err(LoadError::CyclicDependency { cycle });
                }
                Mark::Unvisited => self.visit(next, marks, path)?,
                Mark::Done => {}
            }
        }

        path.pop();
        marks[node] = Mark::Done;
        Ok(())
    }

    fn compute_layers(&self) -> Vec<usize> {
        fn depth(graph: &DependencyGraph, node: usize, memo: &mut [Option<usize>]) -> usize {
            if let Some(d) = memo[node] {
                return d;
            }
            let d = graph.predecessors[node]
                .iter()
                .map(|&p| depth(graph, p, memo) + 1)
                .max()
                .unwrap_or(0);
            memo[node] = Some(d);
            d
        }

        let mut memo = vec![None; self.jobs.len()];
        (0..self.jobs.len())
            .map(|node| depth(self, node, &mut memo))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn contains(&self, job: &str) -> bool {
        self.index.contains_key(job)
    }

    /// Declaration index of a job
    pub fn position(&self, job: &str) -> Option<usize> {
        self.index.get(job).copied()
    }

    fn names(&self, nodes: &[usize]) -> Vec<&str> {
        nodes.iter().map(|&n| self.jobs[n].as_str()).collect()
    }

    /// Jobs named in `needs` of `job`
    pub fn predecessors(&self, job: &str) -> Vec<&str> {
        self.position(job)
            .map(|i| self.names(&self.predecessors[i]))
            .unwrap_or_default()
    }

    /// Jobs that directly need `job`
    pub fn dependents(&self, job: &str) -> Vec<&str> {
        self.position(job)
            .map(|i| self.names(&self.dependents[i]))
            .unwrap_or_default()
    }

    /// Transitive predecessors of `job`, in declaration order
    pub fn ancestors(&self, job: &str) -> Vec<&str> {
        let Some(start) = self.position(job) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut stack = self.predecessors[start].clone();
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend(self.predecessors[node].iter().copied());
            }
        }
        let mut nodes: Vec<usize> = seen.into_iter().collect();
        nodes.sort_unstable();
        self.names(&nodes)
    }

    /// Depth of `job`: 0 without needs, otherwise one more than its deepest predecessor
    pub fn layer_of(&self, job: &str) -> Option<usize> {
        self.position(job).map(|i| self.layer[i])
    }

    /// Jobs grouped by layer, declaration order within each layer
    pub fn layers(&self) -> Vec<Vec<&str>> {
        let depth = self.layer.iter().copied().max().map_or(0, |d| d + 1);
        let mut layers = vec![Vec::new(); depth];
        for (node, &d) in self.layer.iter().enumerate() {
            layers[d].push(self.jobs[node].as_str());
        }
        layers
    }

    pub fn topological_order(&self) -> Vec<&str> {
        self.layers().into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(spec: &[(&str, &[&str])]) -> Result<DependencyGraph, LoadError> {
        let owned: Vec<(String, Vec<String>)> = spec
            .iter()
            .map(|(id, needs)| (id.to_string(), needs.iter().map(|n| n.to_string()).collect()))
            .collect();
        DependencyGraph::build(owned.iter().map(|(id, needs)| (id.as_str(), needs.as_slice())))
    }

    #[test]
    fn test_layers_and_order() {
        let g = graph(&[
            ("deploy", &["test", "lint"]),
            ("build", &[]),
            ("test", &["build"]),
            ("lint", &[]),
        ])
        .unwrap();

        assert_eq!(g.layers(), vec![vec!["build", "lint"], vec!["test"], vec!["deploy"]]);
        assert_eq!(g.topological_order(), vec!["build", "lint", "test", "deploy"]);
        assert_eq!(g.predecessors("deploy"), vec!["test", "lint"]);
        assert_eq!(g.dependents("build"), vec!["test"]);
        assert_eq!(g.ancestors("deploy"), vec!["build", "test", "lint"]);
        assert_eq!(g.layer_of("deploy"), Some(2));
    }

    #[test]
    fn test_cycle_reports_path() {
        let err = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]).unwrap_err();
        match err {
            LoadError::CyclicDependency { cycle } => {
                assert_eq!(cycle, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let err = graph(&[("a", &["a"])]).unwrap_err();
        assert!(matches!(err, LoadError::CyclicDependency { ref cycle } if cycle == &["a", "a"]));
    }

    #[test]
    fn test_cycle_behind_valid_prefix() {
        let err = graph(&[("root", &[]), ("x", &["root", "y"]), ("y", &["x"])]).unwrap_err();
        match err {
            LoadError::CyclicDependency { cycle } => assert_eq!(cycle, vec!["x", "y", "x"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_job() {
        let err = graph(&[("a", &["missing"])]).unwrap_err();
        match err {
            LoadError::UnknownJob { job, needed } => {
                assert_eq!(job, "a");
                assert_eq!(needed, "missing");
            }
            other => panic!("expected unknown job, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_job() {
        assert!(matches!(
            graph(&[("a", &[]), ("a", &[])]),
            Err(LoadError::DuplicateJob(id)) if id == "a"
        ));
    }

    #[test]
    fn test_repeated_need_is_collapsed() {
        let g = graph(&[("a", &[]), ("b", &["a", "a"])]).unwrap();
        assert_eq!(g.predecessors("b"), vec!["a"]);
        assert_eq!(g.dependents("a"), vec!["b"]);
    }
}
