//! Plain-text rendering of workspace records.

use receipt_core::{ImageRecord, Validation};

const KEY_WIDTH: usize = 36;

/// One line per record: key, status, then date / store / total.
pub fn print_records<'a>(records: impl Iterator<Item = (&'a str, &'a ImageRecord)>) {
    println!(
        "{:<KEY_WIDTH$} {:<10} {:<10} {:<24} {:>10}",
        "image", "status", "date", "store", "total"
    );
    let mut count = 0;
    for (key, record) in records {
        let data = &record.extracted_data;
        println!(
            "{:<KEY_WIDTH$} {:<10} {:<10} {:<24} {:>10}",
            truncate(key, KEY_WIDTH),
            record.status().as_str(),
            data.transaction_date.as_deref().unwrap_or("-"),
            truncate(data.store_name.as_deref().unwrap_or("-"), 24),
            data.total_amount
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
        if let (Some(class), Some(details)) = (
            &record.processing_status.error_type,
            &record.processing_status.error_details,
        ) {
            println!("  {class}: {details}");
        }
        count += 1;
    }
    println!("({count} image(s))");
}

pub fn print_validation(validation: &Validation) {
    for error in &validation.errors {
        println!("  error: {error}");
    }
    for warning in &validation.warnings {
        println!("  warning: {warning}");
    }
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_string();
    }
    let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}
