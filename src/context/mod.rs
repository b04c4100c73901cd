//! 会话上下文：操作历史、已提及实体与当前工作数据

pub mod entities;
pub mod tracker;

pub use entities::{EntityCategory, EntityExtractor};
pub use tracker::{ContextTracker, CurrentData, Operation, OperationKind, SessionContext};
