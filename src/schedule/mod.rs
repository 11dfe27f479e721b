//! Dependency validation and wave assignment.
//!
//! A task's wave is `0` when it has no dependencies, otherwise one more than
//! the highest wave among its dependencies. Tasks sharing a wave are
//! mutually independent and may run concurrently.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::error::{Result, WavesError};
use crate::plan::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Validates dependency graphs and assigns execution waves.
#[derive(Debug, Default, Clone, Copy)]
pub struct WaveScheduler;

impl WaveScheduler {
    /// Check that every dependency exists and the graph is acyclic.
    ///
    /// # Errors
    ///
    /// [`WavesError::UnresolvedDependency`] for the first unknown id (tasks in
    /// plan order, dependencies ascending), then
    /// [`WavesError::CyclicDependency`] with the cycle members in walk order.
    pub fn validate(tasks: &[Task]) -> Result<()> {
        let by_id: HashMap<u32, &Task> = tasks.iter().map(|t| (t.id, t)).collect();

        for task in tasks {
            if let Some(missing) = task.depends_on.iter().find(|d| !by_id.contains_key(d)) {
                return Err(WavesError::UnresolvedDependency {
                    task_id: task.id,
                    missing_id: *missing,
                });
            }
        }

        let mut marks: HashMap<u32, Mark> = HashMap::new();
        let mut path: Vec<u32> = Vec::new();
        for task in tasks {
            Self::visit(task.id, &by_id, &mut marks, &mut path)?;
        }
        Ok(())
    }

    fn visit(
        id: u32,
        by_id: &HashMap<u32, &Task>,
        marks: &mut HashMap<u32, Mark>,
        path: &mut Vec<u32>,
    ) -> Result<()> {
        match marks.get(&id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                let start = path.iter().position(|p| *p == id).unwrap_or(0);
                return Err(WavesError::CyclicDependency {
                    cycle: path[start..].to_vec(),
                });
            }
            None => {}
        }

        marks.insert(id, Mark::InProgress);
        path.push(id);
        if let Some(task) = by_id.get(&id) {
            for dep in &task.depends_on {
                Self::visit(*dep, by_id, marks, path)?;
            }
        }
        path.pop();
        marks.insert(id, Mark::Done);
        Ok(())
    }

    /// Validate, then map every task id to its wave.
    ///
    /// # Errors
    ///
    /// Propagates validation errors; no waves are computed for a bad plan.
    pub fn compute_waves(tasks: &[Task]) -> Result<BTreeMap<u32, usize>> {
        Self::validate(tasks)?;

        let by_id: HashMap<u32, &Task> = tasks.iter().map(|t| (t.id, t)).collect();
        let mut memo: BTreeMap<u32, usize> = BTreeMap::new();
        for task in tasks {
            Self::wave_of(task.id, &by_id, &mut memo);
        }
        Ok(memo)
    }

    // Terminates because the graph was validated acyclic.
    fn wave_of(id: u32, by_id: &HashMap<u32, &Task>, memo: &mut BTreeMap<u32, usize>) -> usize {
        if let Some(wave) = memo.get(&id) {
            return *wave;
        }
        let wave = by_id
            .get(&id)
            .and_then(|task| {
                task.depends_on
                    .iter()
                    .map(|dep| Self::wave_of(*dep, by_id, memo))
                    .max()
            })
            .map_or(0, |deepest| deepest + 1);
        memo.insert(id, wave);
        wave
    }

    /// Validate and group tasks into ordered execution batches.
    ///
    /// # Example
    ///
    /// ```
    /// use ralph_waves::plan::parse_plan;
    /// use ralph_waves::schedule::WaveScheduler;
    ///
    /// let tasks = parse_plan("## Task 1: A\n## Task 2: B\n**Dependencies:** Task 1\n").unwrap();
    /// let plan = WaveScheduler::plan(tasks).unwrap();
    /// assert_eq!(plan.waves(), &[vec![1], vec![2]]);
    /// ```
    pub fn plan(tasks: Vec<Task>) -> Result<WavePlan> {
        let assignments = Self::compute_waves(&tasks)?;

        let depth = assignments.values().max().map_or(0, |max| max + 1);
        let mut waves: Vec<Vec<u32>> = vec![Vec::new(); depth];
        for (id, wave) in &assignments {
            waves[*wave].push(*id);
        }

        Ok(WavePlan {
            tasks: tasks.into_iter().map(|t| (t.id, t)).collect(),
            assignments,
            waves,
        })
    }
}

/// A validated plan with its wave assignment.
#[derive(Debug, Clone, Serialize)]
pub struct WavePlan {
    tasks: BTreeMap<u32, Task>,
    assignments: BTreeMap<u32, usize>,
    waves: Vec<Vec<u32>>,
}

impl WavePlan {
    /// Batches in ascending wave order, ids ascending within a batch.
    #[must_use]
    pub fn waves(&self) -> &[Vec<u32>] {
        &self.waves
    }

    #[must_use]
    pub fn wave_of(&self, id: u32) -> Option<usize> {
        self.assignments.get(&id).copied()
    }

    #[must_use]
    pub fn task(&self, id: u32) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    #[must_use]
    pub fn assignments(&self) -> &BTreeMap<u32, usize> {
        &self.assignments
    }

    /// Tasks that list `id` as a direct dependency.
    #[must_use]
    pub fn dependents_of(&self, id: u32) -> Vec<u32> {
        self.tasks
            .values()
            .filter(|t| t.depends_on.contains(&id))
            .map(|t| t.id)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::parse_plan;

    fn task(id: u32, deps: &[u32]) -> Task {
        Task::new(id, format!("task {id}")).with_dependencies(deps.iter().copied())
    }

    #[test]
    fn test_three_task_example_waves() {
        let plan = "## Task 1: Setup\n**Dependencies:** None\n\n## Task 2: Auth\n**Dependencies:** Task 1\n\n## Task 3: API\n**Dependencies:** Task 1, Task 2\n";
        let waves = WaveScheduler::compute_waves(&parse_plan(plan).unwrap()).unwrap();
        assert_eq!(waves, BTreeMap::from([(1, 0), (2, 1), (3, 2)]));
    }

    #[test]
    fn test_independent_tasks_share_wave_zero() {
        let waves = WaveScheduler::compute_waves(&[task(1, &[]), task(2, &[]), task(3, &[])]).unwrap();
        assert!(waves.values().all(|w| *w == 0));
    }

    #[test]
    fn test_wave_strictly_follows_dependencies() {
        let tasks = vec![
            task(1, &[]),
            task(2, &[1]),
            task(3, &[]),
            task(4, &[2, 3]),
            task(5, &[1]),
            task(6, &[4, 5]),
            task(7, &[3]),
        ];
        let waves = WaveScheduler::compute_waves(&tasks).unwrap();
        for t in &tasks {
            if t.depends_on.is_empty() {
                assert_eq!(waves[&t.id], 0);
            }
            for d in &t.depends_on {
                assert!(waves[&t.id] > waves[d], "task {} vs dep {}", t.id, d);
            }
        }
        assert_eq!(waves[&6], 3);
    }

    #[test]
    fn test_dependency_order_independent_of_plan_order() {
        let waves = WaveScheduler::compute_waves(&[task(3, &[2]), task(2, &[1]), task(1, &[])]).unwrap();
        assert_eq!(waves, BTreeMap::from([(1, 0), (2, 1), (3, 2)]));
    }

    #[test]
    fn test_unresolved_dependency() {
        let err = WaveScheduler::validate(&[task(1, &[]), task(2, &[1, 9])]).unwrap_err();
        assert!(matches!(
            err,
            WavesError::UnresolvedDependency {
                task_id: 2,
                missing_id: 9
            }
        ));
    }

    #[test]
    fn test_two_cycle_rejected() {
        let err = WaveScheduler::validate(&[task(1, &[2]), task(2, &[1])]).unwrap_err();
        match err {
            WavesError::CyclicDependency { cycle } => assert_eq!(cycle, vec![1, 2]),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_long_cycle_rejected_with_members() {
        let tasks = vec![task(1, &[]), task(2, &[1, 4]), task(3, &[2]), task(4, &[3])];
        match WaveScheduler::compute_waves(&tasks).unwrap_err() {
            WavesError::CyclicDependency { cycle } => assert_eq!(cycle, vec![2, 4, 3]),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_unresolved_reported_before_cycle() {
        let tasks = vec![task(1, &[2]), task(2, &[1]), task(3, &[7])];
        assert!(matches!(
            WaveScheduler::plan(tasks),
            Err(WavesError::UnresolvedDependency { task_id: 3, .. })
        ));
    }

    #[test]
    fn test_plan_groups_batches() {
        let plan = WaveScheduler::plan(vec![task(4, &[1]), task(1, &[]), task(2, &[]), task(3, &[1, 2])]).unwrap();
        assert_eq!(plan.waves(), &[vec![1, 2], vec![3, 4]]);
        assert_eq!(plan.wave_of(3), Some(1));
        assert_eq!(plan.dependents_of(1), vec![3, 4]);
        assert_eq!(plan.len(), 4);
    }

    #[test]
    fn test_empty_plan() {
        let plan = WaveScheduler::plan(Vec::new()).unwrap();
        assert!(plan.is_empty());
        assert!(plan.waves().is_empty());
    }
}
