//! Detection classes produced by the label detector and their ground-truth
//! column names.

/// Column in `ground_truth.csv` holding the image file name.
pub const IMAGE_FILENAME_COLUMN: &str = "Box Label";

/// Every field the detector can emit, in report order.
pub const DETECTION_CLASSES: [&str; 16] = [
    "Made In Label",
    "Barcode",
    "Box Number",
    "Halal stamp",
    "SKU Name",
    "Pack Date",
    "Kill Date",
    "Product Instructions",
    "Facility Name",
    "Facility Address",
    "Net Weight Label",
    "Net Weight (kg)",
    "Net Weight (lb)",
    "Piece Count",
    "Meta Data",
    "Site Stamp",
];

/// Ground-truth CSV column for a detection class.
///
/// Most columns share the class name; a few carry a `(?)` suffix in the
/// annotation sheet.
pub fn csv_column_for(class_name: &str) -> &str {
    match class_name {
        "Box Number" => "Box Number (?)",
        "SKU Name" => "SKU Name (?)",
        "Site Stamp" => "Site Stamp (?)",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffixed_columns_are_mapped() {
        assert_eq!(csv_column_for("Box Number"), "Box Number (?)");
        assert_eq!(csv_column_for("Site Stamp"), "Site Stamp (?)");
    }

    #[test]
    fn plain_columns_pass_through() {
        assert_eq!(csv_column_for("Barcode"), "Barcode");
        assert_eq!(csv_column_for("Net Weight (kg)"), "Net Weight (kg)");
    }
}
