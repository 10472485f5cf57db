//! 记录表导出（CSV，列名与人工表格一致）

use crate::error::{AppError, AppResult};
use crate::models::AssessmentRecord;

pub const EXPORT_HEADERS: [&str; 9] = [
    "NICAD",
    "Type d'immeuble",
    "Catégorie",
    "Niveaux",
    "Description",
    "CENVET",
    "Voisinage",
    "Abattement",
    "Erreur",
];

/// 把整张表渲染成 CSV 字节
pub fn records_to_csv(records: &[AssessmentRecord]) -> AppResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(EXPORT_HEADERS).map_err(csv_error)?;

    for record in records {
        let error = record
            .error_state
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_default();
        writer
            .write_record([
                record.identifier.clone(),
                record.building_type_label(),
                record.category_label(),
                record.levels_label(),
                record.description_label(),
                record.maintenance_label(),
                record.neighborhood_label(),
                record.abatement_label(),
                error,
            ])
            .map_err(csv_error)?;
    }

    writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("CSV 导出失败: {}", e)))
}

fn csv_error(err: csv::Error) -> AppError {
    AppError::Internal(format!("CSV 导出失败: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BuildingType, Category, ErrorKind, ErrorState, NOT_SPECIFIED};

    #[test]
    fn test_export_rows() {
        let ok = AssessmentRecord {
            building_type: Some(BuildingType::Collective),
            category: Some(Category::A),
            description: Some("Immeuble, trois étages.".into()),
            ..AssessmentRecord::empty("0001")
        };
        let failed = AssessmentRecord::failed("0002", ErrorState::new(ErrorKind::ExternalService, "quota"));

        let csv = String::from_utf8(records_to_csv(&[ok, failed]).unwrap()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("NICAD,Type d'immeuble,Catégorie"));
        assert!(lines[1].starts_with("0001,collectif,A,"));
        assert!(lines[1].contains("\"Immeuble, trois étages.\""));
        assert!(lines[2].starts_with(&format!("0002,{},", NOT_SPECIFIED)));
        assert!(lines[2].ends_with(",quota"));
    }

    #[test]
    fn test_empty_table_has_header_only() {
        let csv = String::from_utf8(records_to_csv(&[]).unwrap()).unwrap();
        assert_eq!(csv.lines().count(), 1);
    }
}
