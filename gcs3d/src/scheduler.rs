//! Three-phase job scheduling.
//!
//! Jobs are owned by value and run preprocess, process, postprocess in that
//! order. Within a phase lower priority values run first; equal priorities
//! keep their insertion order.

use crate::Error;

pub trait Job<S> {
    fn priority(&self) -> i32 {
        1000
    }
    fn execute(&mut self, system: &mut S) -> Result<(), Error>;
}

pub struct Scheduler<S> {
    preprocess: Vec<Box<dyn Job<S>>>,
    process: Vec<Box<dyn Job<S>>>,
    postprocess: Vec<Box<dyn Job<S>>>,
}

impl<S> Default for Scheduler<S> {
    fn default() -> Self {
        Self {
            preprocess: Vec::new(),
            process: Vec::new(),
            postprocess: Vec::new(),
        }
    }
}

impl<S> Scheduler<S> {
    pub fn add_preprocess_job(&mut self, job: Box<dyn Job<S>>) {
        Self::insert(&mut self.preprocess, job);
    }

    pub fn add_process_job(&mut self, job: Box<dyn Job<S>>) {
        Self::insert(&mut self.process, job);
    }

    pub fn add_postprocess_job(&mut self, job: Box<dyn Job<S>>) {
        Self::insert(&mut self.postprocess, job);
    }

    fn insert(list: &mut Vec<Box<dyn Job<S>>>, job: Box<dyn Job<S>>) {
        list.push(job);
        // stable: equal priorities stay in insertion order
        list.sort_by_key(|j| j.priority());
    }

    pub fn execute(&mut self, system: &mut S) -> Result<(), Error> {
        for job in &mut self.preprocess {
            job.execute(system)?;
        }
        for job in &mut self.process {
            job.execute(system)?;
        }
        for job in &mut self.postprocess {
            job.execute(system)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tag {
        name: &'static str,
        priority: i32,
    }

    impl Job<Vec<&'static str>> for Tag {
        fn priority(&self) -> i32 {
            self.priority
        }
        fn execute(&mut self, log: &mut Vec<&'static str>) -> Result<(), Error> {
            log.push(self.name);
            Ok(())
        }
    }

    #[test]
    fn phases_run_in_order_with_priorities() {
        let mut sched: Scheduler<Vec<&'static str>> = Scheduler::default();
        sched.add_postprocess_job(Box::new(Tag {
            name: "post",
            priority: 1000,
        }));
        sched.add_process_job(Box::new(Tag {
            name: "late",
            priority: 2000,
        }));
        sched.add_process_job(Box::new(Tag {
            name: "early",
            priority: 10,
        }));
        sched.add_preprocess_job(Box::new(Tag {
            name: "pre",
            priority: 1000,
        }));

        let mut log = Vec::new();
        sched.execute(&mut log).unwrap();
        assert_eq!(log, vec!["pre", "early", "late", "post"]);
    }

    #[test]
    fn equal_priorities_keep_insertion_order() {
        let mut sched: Scheduler<Vec<&'static str>> = Scheduler::default();
        for name in ["a", "b", "c"] {
            sched.add_process_job(Box::new(Tag {
                name,
                priority: 1000,
            }));
        }
        let mut log = Vec::new();
        sched.execute(&mut log).unwrap();
        assert_eq!(log, vec!["a", "b", "c"]);
    }
}
