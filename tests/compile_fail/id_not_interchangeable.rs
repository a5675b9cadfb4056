// ABOUTME: Compile-fail test verifying HolderId and CorrelationId are not interchangeable.
// ABOUTME: This test should fail to compile, validating type safety.

use stateward::types::{CorrelationId, HolderId};

fn takes_holder_id(_id: HolderId) {}

fn main() {
    let correlation = CorrelationId::new("run-123");
    takes_holder_id(correlation); // ERROR: expected HolderId, found CorrelationId
}
