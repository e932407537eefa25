pub mod condition;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod interpreter;
pub mod scheduler;
pub mod state;
pub mod timer;

pub use condition::{Combinator, Condition, ConditionGroup, Operator};
pub use context::ExecutionContext;
pub use dispatcher::{Event, TriggerDispatcher};
pub use engine::WorkflowEngine;
pub use interpreter::StepInterpreter;
pub use scheduler::ExecutionScheduler;
pub use state::{StepError, Transition};
pub use timer::TimerIndex;
