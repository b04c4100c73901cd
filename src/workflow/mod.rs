//! 工作流：顺序执行的技能调用，步骤间数据传递、守卫条件与失败回滚通知

pub mod builder;
pub mod engine;
pub mod templates;
pub mod types;

pub use builder::WorkflowBuilder;
pub use engine::{StepRunner, WorkflowEngine};
pub use templates::{WorkflowRegistry, FEASIBILITY_WITH_SENSITIVITY, FULL_ANALYSIS};
pub use types::{
    StepId, StepInput, StepOutcome, Workflow, WorkflowContext, WorkflowError, WorkflowResult,
    WorkflowStep, INPUT_REF,
};
