#![forbid(unsafe_code)]
//! daoplan-planner: from declarative interface metadata to compiled method plans.
//!
//! Pipeline (runs once per interface, at bind time):
//!     * `classify`  - list/exists analysis of default-kind methods
//!     * `resolve`   - operation tag (+ SQL mapper) -> `QueryDescriptor`
//!     * `binding`   - method arguments -> statement parameters
//!     * `compile`   - descriptor + binding + return shape -> `MethodPlan`
//!     * `crud`      - precompiled identity operations for entity interfaces
//!     * `program`   - whole-interface validation and decorator assembly
//!
//! Nothing here executes SQL; `daoplan-exec` instantiates the plans.

pub mod binding;
pub mod classify;
pub mod compile;
pub mod crud;
pub mod dsl;
pub mod program;
pub mod resolve;

pub use binding::{
    build_binding, BindingShape, CallbackSlots, ItemBinding, ParamTarget, ParameterBinding,
};
pub use classify::{classify, Classification};
pub use compile::{
    compile_method, CallAction, CountReturn, IdReturn, MethodPlan, PlanBody, ReadAction,
    RowConversion, StatementLog, WriteAction,
};
pub use dsl::yaml::{parse_dao_yaml, parse_mapper_yaml, DaoFile};
pub use program::{compile_interface, CompiledMethod, DecoratorSpec, InterfaceProgram};
pub use resolve::resolve;
