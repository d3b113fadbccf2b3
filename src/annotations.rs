//! Buildbot step annotations.
//!
//! When the tool runs on a bot, wrapping each phase in these markers makes
//! the waterfall split the log into collapsible named steps.

pub fn step_start(name: &str) {
    println!("@@@SEED_STEP {name}@@@");
    println!("@@@STEP_CURSOR {name}@@@");
    println!("@@@STEP_STARTED@@@");
}

pub fn step_closed() {
    println!("@@@STEP_CLOSED@@@");
}
