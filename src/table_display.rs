use comfy_table::{Attribute, Cell as TableCell, ContentArrangement, Table};
use crossterm::style::Stylize;
use sltax::normalizer::{Cell, TabularResult};

fn cell_text(cell: &Cell) -> String {
    match cell {
        Cell::Empty => "".to_string(),
        other => other.to_string(),
    }
}

pub fn display_grid(grid: &TabularResult) {
    if let Some(message) = grid.error_message() {
        eprintln!("{}", format!("ERROR: {}", message).red());
        return;
    }

    if grid.is_empty() {
        println!("{}", "No results returned.".yellow());
        return;
    }

    // Single values print bare so they can be piped
    if let Some(cell) = grid.as_scalar() {
        println!("{}", cell_text(cell));
        return;
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    if let Some(header) = grid.header() {
        let headers: Vec<TableCell> = header
            .iter()
            .map(|h| TableCell::new(h).add_attribute(Attribute::Bold))
            .collect();
        table.set_header(headers);
    }

    for row in grid.rows() {
        let cells: Vec<String> = row.iter().map(cell_text).collect();
        table.add_row(cells);
    }

    println!("{table}");
    if grid.len() > 1 {
        println!("\n{}", format!("{} rows returned", grid.len()).green());
    }
}

pub fn print_json(grid: &TabularResult) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(grid)?);
    Ok(())
}

pub fn export_to_csv(grid: &TabularResult, filename: &str) -> anyhow::Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(filename)?;

    if let Some(header) = grid.header() {
        wtr.write_record(header)?;
    }

    for row in grid.rows() {
        let record: Vec<String> = row.iter().map(cell_text).collect();
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    println!("{}", format!("Results exported to {}", filename).green());
    Ok(())
}
