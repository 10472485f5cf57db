//! 评估记录模型
//!
//! 每个地块（NICAD）对应一条 `AssessmentRecord`。
//! 字段缺失或取值越界时统一用 `None` 表示"未指定"，展示时输出 [`NOT_SPECIFIED`]。

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::fold;

/// "未指定" 的展示文字
pub const NOT_SPECIFIED: &str = "Non précisé";

/// 允许的邻里系数
pub const NEIGHBORHOOD_COEFFICIENTS: [f64; 4] = [0.8, 0.9, 1.0, 1.1];

const COEFFICIENT_EPSILON: f64 = 1e-6;

/// 从文件名得到地块标识：去掉扩展名，其余部分区分大小写
///
/// ```
/// use cadastre_assess::models::normalize_identifier;
/// assert_eq!(normalize_identifier("0123456.jpg"), "0123456");
/// assert_eq!(normalize_identifier("0123456"), "0123456");
/// ```
pub fn normalize_identifier(name: &str) -> String {
    let trimmed = name.trim();
    Path::new(trimmed)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| trimmed.to_string())
}

/// 建筑类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildingType {
    /// 独栋（individuel）
    Individual,
    /// 集体住宅（collectif）
    Collective,
    /// 空地（terrain nu）
    BareLand,
}

impl BuildingType {
    /// 法语标签
    pub fn label(self) -> &'static str {
        match self {
            BuildingType::Individual => "individuel",
            BuildingType::Collective => "collectif",
            BuildingType::BareLand => "terrain nu",
        }
    }

    /// 宽松解析（法语或英语，忽略大小写与重音）
    pub fn parse(s: &str) -> Option<Self> {
        match fold(s).as_str() {
            "individuel" | "individuelle" | "individual" | "immeuble individuel" => {
                Some(BuildingType::Individual)
            }
            "collectif" | "collective" | "immeuble collectif" => Some(BuildingType::Collective),
            "terrain nu" | "terrain" | "bare land" | "bareland" => Some(BuildingType::BareLand),
            _ => None,
        }
    }
}

impl fmt::Display for BuildingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 建筑等级
///
/// 独栋为 1–4，集体住宅为 A–D，空地无等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "3")]
    Three,
    #[serde(rename = "4")]
    Four,
    A,
    B,
    C,
    D,
    #[serde(rename = "none")]
    NotApplicable,
}

impl Category {
    pub fn label(self) -> &'static str {
        match self {
            Category::One => "1",
            Category::Two => "2",
            Category::Three => "3",
            Category::Four => "4",
            Category::A => "A",
            Category::B => "B",
            Category::C => "C",
            Category::D => "D",
            Category::NotApplicable => "Aucun",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let folded = fold(s);
        let folded = folded
            .strip_prefix("categorie ")
            .or_else(|| folded.strip_prefix("category "))
            .unwrap_or(&folded);
        match folded {
            "1" => Some(Category::One),
            "2" => Some(Category::Two),
            "3" => Some(Category::Three),
            "4" => Some(Category::Four),
            "a" => Some(Category::A),
            "b" => Some(Category::B),
            "c" => Some(Category::C),
            "d" => Some(Category::D),
            "aucun" | "aucune" | "none" | "n/a" | "sans" => Some(Category::NotApplicable),
            _ => None,
        }
    }

    /// 等级是否与建筑类型一致
    pub fn is_compatible_with(self, building_type: BuildingType) -> bool {
        match building_type {
            BuildingType::Individual => {
                matches!(self, Category::One | Category::Two | Category::Three | Category::Four)
            }
            BuildingType::Collective => {
                matches!(self, Category::A | Category::B | Category::C | Category::D)
            }
            BuildingType::BareLand => self == Category::NotApplicable,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 记录降级的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// 调用分析服务失败
    ExternalService,
    /// 返回文本中找不到合法结构
    Parse,
    /// 保存上传文件失败
    Upload,
}

/// 降级信息，保留原始文本便于排查或重试
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorState {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl ErrorState {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raw: None,
        }
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }
}

/// 一条地籍评估记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRecord {
    pub identifier: String,
    #[serde(default)]
    pub levels: Option<u32>,
    #[serde(default)]
    pub building_type: Option<BuildingType>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub maintenance_coefficient: Option<f64>,
    #[serde(default)]
    pub neighborhood_coefficient: Option<f64>,
    #[serde(default)]
    pub abatement_coefficient: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_state: Option<ErrorState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl AssessmentRecord {
    /// 所有字段均为"未指定"的空记录
    pub fn empty(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            levels: None,
            building_type: None,
            category: None,
            description: None,
            maintenance_coefficient: None,
            neighborhood_coefficient: None,
            abatement_coefficient: None,
            error_state: None,
            analyzed_at: Some(Utc::now()),
        }
    }

    /// 降级记录
    pub fn failed(identifier: impl Into<String>, error: ErrorState) -> Self {
        Self {
            error_state: Some(error),
            ..Self::empty(identifier)
        }
    }

    pub fn is_errored(&self) -> bool {
        self.error_state.is_some()
    }

    /// 没有降级且所有字段都已指定
    pub fn is_complete(&self) -> bool {
        self.error_state.is_none()
            && self.levels.is_some()
            && self.building_type.is_some()
            && self.category.is_some()
            && self.description.is_some()
            && self.maintenance_coefficient.is_some()
            && self.neighborhood_coefficient.is_some()
            && self.abatement_coefficient.is_some()
    }

    pub fn levels_label(&self) -> String {
        display_or_unspecified(self.levels)
    }

    pub fn building_type_label(&self) -> String {
        display_or_unspecified(self.building_type)
    }

    pub fn category_label(&self) -> String {
        display_or_unspecified(self.category)
    }

    pub fn description_label(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| NOT_SPECIFIED.to_string())
    }

    pub fn maintenance_label(&self) -> String {
        coefficient_or_unspecified(self.maintenance_coefficient)
    }

    pub fn neighborhood_label(&self) -> String {
        coefficient_or_unspecified(self.neighborhood_coefficient)
    }

    pub fn abatement_label(&self) -> String {
        coefficient_or_unspecified(self.abatement_coefficient)
    }
}

fn display_or_unspecified<T: fmt::Display>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| NOT_SPECIFIED.to_string())
}

fn coefficient_or_unspecified(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| NOT_SPECIFIED.to_string())
}

// ========== 取值校验 ==========

/// 维护与折旧系数（CENVET），范围 [0.3, 1.0]
pub fn valid_maintenance(value: f64) -> Option<f64> {
    (0.3 - COEFFICIENT_EPSILON..=1.0 + COEFFICIENT_EPSILON)
        .contains(&value)
        .then(|| value.clamp(0.3, 1.0))
}

/// 邻里系数，只能取 0.8 / 0.9 / 1.0 / 1.1，返回规范值
pub fn valid_neighborhood(value: f64) -> Option<f64> {
    NEIGHBORHOOD_COEFFICIENTS
        .iter()
        .copied()
        .find(|allowed| (allowed - value).abs() < COEFFICIENT_EPSILON)
}

/// 房龄减免系数：1.0（6 年以内）或 [0.5, 0.95]
pub fn valid_abatement(value: f64) -> Option<f64> {
    if (value - 1.0).abs() < COEFFICIENT_EPSILON {
        return Some(1.0);
    }
    (0.5 - COEFFICIENT_EPSILON..=0.95 + COEFFICIENT_EPSILON)
        .contains(&value)
        .then(|| value.clamp(0.5, 0.95))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_record() -> AssessmentRecord {
        AssessmentRecord {
            identifier: "0123".into(),
            levels: Some(2),
            building_type: Some(BuildingType::Individual),
            category: Some(Category::Two),
            description: Some("Villa en béton.".into()),
            maintenance_coefficient: Some(0.8),
            neighborhood_coefficient: Some(1.0),
            abatement_coefficient: Some(0.9),
            error_state: None,
            analyzed_at: None,
        }
    }

    #[test]
    fn test_normalize_identifier() {
        assert_eq!(normalize_identifier("parcelle.png"), "parcelle");
        assert_eq!(normalize_identifier("Parcelle.JPEG"), "Parcelle");
        assert_eq!(normalize_identifier("a.b.jpg"), "a.b");
        assert_eq!(normalize_identifier("plain"), "plain");
        assert_ne!(normalize_identifier("ABC.jpg"), normalize_identifier("abc.jpg"));
    }

    #[test]
    fn test_building_type_parse() {
        assert_eq!(BuildingType::parse("Individuel"), Some(BuildingType::Individual));
        assert_eq!(BuildingType::parse("COLLECTIF"), Some(BuildingType::Collective));
        assert_eq!(BuildingType::parse("terrain_nu"), Some(BuildingType::BareLand));
        assert_eq!(BuildingType::parse("bare-land"), Some(BuildingType::BareLand));
        assert_eq!(BuildingType::parse("individuel/collectif"), None);
    }

    #[test]
    fn test_category_parse_and_compatibility() {
        assert_eq!(Category::parse("b"), Some(Category::B));
        assert_eq!(Category::parse("Catégorie 3"), Some(Category::Three));
        assert_eq!(Category::parse("Aucun"), Some(Category::NotApplicable));
        assert_eq!(Category::parse("E"), None);

        assert!(Category::Three.is_compatible_with(BuildingType::Individual));
        assert!(!Category::Three.is_compatible_with(BuildingType::Collective));
        assert!(Category::NotApplicable.is_compatible_with(BuildingType::BareLand));
        assert!(!Category::A.is_compatible_with(BuildingType::BareLand));
    }

    #[test]
    fn test_coefficient_ranges() {
        assert_eq!(valid_maintenance(0.3), Some(0.3));
        assert_eq!(valid_maintenance(1.2), None);
        assert_eq!(valid_maintenance(0.25), None);

        assert_eq!(valid_neighborhood(0.9000000001), Some(0.9));
        assert_eq!(valid_neighborhood(0.85), None);

        assert_eq!(valid_abatement(1.0), Some(1.0));
        assert_eq!(valid_abatement(0.7), Some(0.7));
        assert_eq!(valid_abatement(0.97), None);
        assert_eq!(valid_abatement(0.4), None);
    }

    #[test]
    fn test_completeness() {
        let record = complete_record();
        assert!(record.is_complete());

        let mut missing = record.clone();
        missing.category = None;
        assert!(!missing.is_complete());

        let mut errored = record;
        errored.error_state = Some(ErrorState::new(ErrorKind::Parse, "no structure"));
        assert!(!errored.is_complete());
        assert!(errored.is_errored());
    }

    #[test]
    fn test_labels_use_sentinel() {
        let record = AssessmentRecord::empty("X");
        assert_eq!(record.levels_label(), NOT_SPECIFIED);
        assert_eq!(record.category_label(), NOT_SPECIFIED);
        assert_eq!(complete_record().maintenance_label(), "0.80");
        assert_eq!(complete_record().building_type_label(), "individuel");
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(complete_record()).unwrap();
        assert_eq!(json["buildingType"], "individual");
        assert_eq!(json["category"], "2");
        assert!(json.get("errorState").is_none());

        let back: AssessmentRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, complete_record());
    }
}
