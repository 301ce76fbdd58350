pub mod cluster;
pub mod credential;
pub mod machine;
pub mod recover;

use sshgrid_ops::SagaReport;

/// Print the steps a workflow completed and any warnings it collected.
pub fn print_report(report: &SagaReport) {
    for step in &report.completed {
        println!("  ✓ {step}");
    }
    for warning in &report.warnings {
        println!("  ! {}: {}", warning.step, warning.message);
    }
}
