//! Table rendering for replay reports.

use cadence_protocol::BuildStatus;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};

use crate::replay::ReplayReport;

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);
    table
}

fn status_color(status: BuildStatus) -> Color {
    match status {
        BuildStatus::Success => Color::Green,
        BuildStatus::Failure | BuildStatus::Aborted => Color::Red,
        BuildStatus::Unstable | BuildStatus::Blocked | BuildStatus::Frozen => Color::Yellow,
        BuildStatus::Collapsed => Color::DarkGrey,
        BuildStatus::Created | BuildStatus::Queued | BuildStatus::Running => Color::White,
    }
}

pub fn builds_table(report: &ReplayReport) -> Table {
    let mut table = new_table(&["ID", "JOB", "STATUS", "MESSAGE", "PARENTS"]);
    for row in &report.builds {
        let build = &row.build;
        let parents = build
            .parent_build_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        table.add_row(vec![
            Cell::new(build.id),
            Cell::new(&row.job),
            Cell::new(build.status).fg(status_color(build.status)),
            Cell::new(build.status_message.as_deref().unwrap_or("-")),
            Cell::new(if parents.is_empty() { "-".to_string() } else { parents }),
        ]);
    }
    table
}

pub fn notices_table(report: &ReplayReport) -> Table {
    let mut table = new_table(&["BUILD", "JOB", "STATUS", "FIXED", "LINK"]);
    for notice in &report.notices {
        table.add_row(vec![
            Cell::new(notice.build_id),
            Cell::new(&notice.job_name),
            Cell::new(notice.status).fg(status_color(notice.status)),
            Cell::new(if notice.is_fixed { "yes" } else { "" }),
            Cell::new(&notice.build_link),
        ]);
    }
    table
}

pub fn metrics_table(report: &ReplayReport) -> Table {
    let mut table = new_table(&["COUNTER", "VALUE"]);
    for (name, value) in report.metrics.entries() {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }
    table
}

pub fn print_report(report: &ReplayReport) {
    println!(
        "Event {} ({}): {}",
        report.event.id, report.event.start_from, report.event.status
    );
    println!("{}", builds_table(report));

    if !report.notices.is_empty() {
        println!();
        println!("Notifications:");
        println!("{}", notices_table(report));
    }

    if !report.rejections.is_empty() {
        println!();
        println!("Rejected steps:");
        for rejection in &report.rejections {
            println!("  #{} {}: {}", rejection.step, rejection.job, rejection.reason);
        }
    }

    println!();
    println!("{}", metrics_table(report));
}
