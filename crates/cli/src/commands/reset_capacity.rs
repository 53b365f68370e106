use std::path::Path;

use matchline_core::domain::offer::SupplierId;
use matchline_core::{CapacityAllocator, ResetTarget, RunContext, WorkflowError};
use serde_json::json;

use crate::commands::{runtime, CommandResult};

/// Zeroes `Used` for one supplier, or for every supplier when none is named.
pub fn run(capacity_file: &Path, supplier: Option<&str>) -> CommandResult {
    let target = match supplier {
        Some(id) => ResetTarget::Supplier(SupplierId::from(id)),
        None => ResetTarget::All,
    };
    let runtime = match runtime("reset-capacity") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let context = RunContext::new("-").with_actor("cli");
    let result = runtime.block_on(async {
        let allocator = CapacityAllocator::load(capacity_file, context).await?;
        allocator.reset(&target).await
    });

    match result {
        Ok(reset) => CommandResult::success_with(
            "reset-capacity",
            format!("reset {reset} supplier(s) in {}", capacity_file.display()),
            Some(json!({ "suppliers_reset": reset, "supplier": supplier })),
        ),
        Err(error) => CommandResult::from_workflow_error("reset-capacity", &WorkflowError::from(error)),
    }
}
