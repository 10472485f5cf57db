//! 分析结果解析 - 业务能力层
//!
//! 把分析服务返回的不可信文本转换成 `AssessmentRecord`，永远不会向调用方返回错误。
//!
//! ## 提取规则
//! 1. 取第一个 `{` 到最后一个 `}` 之间的片段，任一缺失即判定为"没有结构"
//! 2. 先按严格 JSON 解析
//! 3. 失败后按宽松字面量解析（单引号、Python 关键字等）
//! 4. 仍失败则返回降级记录，`error_state.raw` 保存完整原文
//! 5. 逐字段做类型转换与范围校验，缺失或非法的字段记为"未指定"，不影响其他字段
//!
//! ## 已知局限
//! 第 1 步是启发式切片而不是括号配对扫描：只要真正结构的括号分别是全文第一个 `{`
//! 和最后一个 `}`，描述文字里的花括号不会影响提取；但如果结构前后的说明文字里
//! 也出现花括号，切出的片段就会包含多余内容并导致解析失败（降级为错误记录）。

use phf::phf_map;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::models::record::{valid_abatement, valid_maintenance, valid_neighborhood};
use crate::models::{AssessmentRecord, BuildingType, Category, ErrorKind, ErrorState};
use crate::services::literal::parse_literal;
use crate::utils::{fold, truncate_text};

/// 结构提取结果
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// 成功提取出对象
    Structured(Map<String, Value>),
    /// 无法提取，附带原因和完整原文
    Unstructured { reason: String, raw: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKey {
    Levels,
    BuildingType,
    Category,
    Description,
    Maintenance,
    Neighborhood,
    Abatement,
}

/// 字段名别名表（键名经过 `fold` 处理，空格替换为 `_`）
static FIELD_KEYS: phf::Map<&'static str, FieldKey> = phf_map! {
    "niveaux" => FieldKey::Levels,
    "nombre_niveaux" => FieldKey::Levels,
    "nombre_de_niveaux" => FieldKey::Levels,
    "levels" => FieldKey::Levels,
    "type_immeuble" => FieldKey::BuildingType,
    "type_d'immeuble" => FieldKey::BuildingType,
    "type" => FieldKey::BuildingType,
    "buildingtype" => FieldKey::BuildingType,
    "building_type" => FieldKey::BuildingType,
    "categorie" => FieldKey::Category,
    "category" => FieldKey::Category,
    "description" => FieldKey::Description,
    "cenvet" => FieldKey::Maintenance,
    "coefficient_entretien" => FieldKey::Maintenance,
    "maintenancecoefficient" => FieldKey::Maintenance,
    "maintenance_coefficient" => FieldKey::Maintenance,
    "coefficient_voisinage" => FieldKey::Neighborhood,
    "voisinage" => FieldKey::Neighborhood,
    "neighborhoodcoefficient" => FieldKey::Neighborhood,
    "neighborhood_coefficient" => FieldKey::Neighborhood,
    "coefficient_abatement" => FieldKey::Abatement,
    "coefficient_abattement" => FieldKey::Abatement,
    "abattement" => FieldKey::Abatement,
    "abatementcoefficient" => FieldKey::Abatement,
    "abatement_coefficient" => FieldKey::Abatement,
};

fn field_key(raw_key: &str) -> Option<FieldKey> {
    let folded = fold(raw_key).replace(' ', "_");
    FIELD_KEYS.get(folded.as_str()).copied()
}

/// 从原始文本中提取结构（第 1–3 步）
pub fn extract_structure(text: &str) -> ParseOutcome {
    let unstructured = |reason: &str| ParseOutcome::Unstructured {
        reason: reason.to_string(),
        raw: text.to_string(),
    };

    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return unstructured("返回文本中没有找到结构");
    };
    if end < start {
        return unstructured("返回文本中没有找到结构");
    }
    let candidate = &text[start..=end];

    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => return ParseOutcome::Structured(map),
        Ok(_) => return unstructured("结构不是对象"),
        Err(e) => debug!("严格 JSON 解析失败，尝试宽松解析: {}", e),
    }

    match parse_literal(candidate) {
        Ok(Value::Object(map)) => ParseOutcome::Structured(map),
        Ok(_) => unstructured("结构不是对象"),
        Err(e) => {
            warn!(
                "无法解析分析结果: {} | 原文: {}",
                e,
                truncate_text(text, 120)
            );
            ParseOutcome::Unstructured {
                reason: e.to_string(),
                raw: text.to_string(),
            }
        }
    }
}

/// 解析分析服务返回的文本，总是返回一条记录
pub fn parse_response(identifier: &str, text: &str) -> AssessmentRecord {
    match extract_structure(text) {
        ParseOutcome::Structured(map) => coerce_fields(identifier, &map),
        ParseOutcome::Unstructured { reason, raw } => AssessmentRecord::failed(
            identifier,
            ErrorState::new(ErrorKind::Parse, reason).with_raw(raw),
        ),
    }
}

/// 按字段做类型转换与范围校验（第 5 步）
pub fn coerce_fields(identifier: &str, map: &Map<String, Value>) -> AssessmentRecord {
    let mut record = AssessmentRecord::empty(identifier);

    for (raw_key, value) in map {
        let Some(key) = field_key(raw_key) else {
            debug!("[{}] 忽略未知字段: {}", identifier, raw_key);
            continue;
        };
        match key {
            FieldKey::Levels => record.levels = coerce_levels(value),
            FieldKey::BuildingType => {
                record.building_type = value.as_str().and_then(BuildingType::parse)
            }
            FieldKey::Category => record.category = coerce_category(value),
            FieldKey::Description => record.description = coerce_description(value),
            FieldKey::Maintenance => {
                record.maintenance_coefficient = coerce_number(value).and_then(valid_maintenance)
            }
            FieldKey::Neighborhood => {
                record.neighborhood_coefficient = coerce_number(value).and_then(valid_neighborhood)
            }
            FieldKey::Abatement => {
                record.abatement_coefficient = coerce_number(value).and_then(valid_abatement)
            }
        }
        if !value.is_null() && !field_is_set(&record, key) {
            warn!("[{}] 字段 {} 的取值无效，记为未指定: {}", identifier, raw_key, value);
        }
    }

    // 等级与类型矛盾时保留类型、丢弃等级
    if let (Some(category), Some(building_type)) = (record.category, record.building_type) {
        if !category.is_compatible_with(building_type) {
            warn!(
                "[{}] 等级 {} 与类型 {} 不一致，等级记为未指定",
                identifier, category, building_type
            );
            record.category = None;
        }
    }

    record
}

fn field_is_set(record: &AssessmentRecord, key: FieldKey) -> bool {
    match key {
        FieldKey::Levels => record.levels.is_some(),
        FieldKey::BuildingType => record.building_type.is_some(),
        FieldKey::Category => record.category.is_some(),
        FieldKey::Description => record.description.is_some(),
        FieldKey::Maintenance => record.maintenance_coefficient.is_some(),
        FieldKey::Neighborhood => record.neighborhood_coefficient.is_some(),
        FieldKey::Abatement => record.abatement_coefficient.is_some(),
    }
}

/// 数字或数字字符串（允许法式小数逗号）
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

/// 层数：整数、整值浮点、数字字符串，或 `RDC` / `R+n` / `terrain nu` 写法
fn coerce_levels(value: &Value) -> Option<u32> {
    if let Some(s) = value.as_str() {
        let folded = fold(s).replace(' ', "");
        if folded == "rdc" {
            return Some(1);
        }
        if folded == "terrainnu" {
            return Some(0);
        }
        if let Some(extra) = folded.strip_prefix("r+") {
            return extra.parse::<u32>().ok().map(|n| n + 1);
        }
    }
    let n = coerce_number(value)?;
    (n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64).then_some(n as u32)
}

fn coerce_category(value: &Value) -> Option<Category> {
    match value {
        Value::String(s) => Category::parse(s),
        Value::Number(n) => n.as_u64().and_then(|n| Category::parse(&n.to_string())),
        _ => None,
    }
}

fn coerce_description(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(" "),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_RESPONSE: &str = r#"Voici mon analyse :
```json
{"niveaux": 3, "type_immeuble": "collectif", "categorie": "B",
 "description": "Immeuble R+2 en béton. Façade peinte, bon état.",
 "cenvet": 0.85, "coefficient_voisinage": 1.1, "coefficient_abatement": 0.9}
```
N'hésitez pas si besoin."#;

    #[test]
    fn test_full_json_with_commentary() {
        let record = parse_response("0001", FULL_RESPONSE);
        assert!(record.is_complete(), "{:?}", record);
        assert_eq!(record.identifier, "0001");
        assert_eq!(record.levels, Some(3));
        assert_eq!(record.building_type, Some(BuildingType::Collective));
        assert_eq!(record.category, Some(Category::B));
        assert_eq!(record.maintenance_coefficient, Some(0.85));
        assert_eq!(record.neighborhood_coefficient, Some(1.1));
        assert_eq!(record.abatement_coefficient, Some(0.9));
    }

    #[test]
    fn test_single_quoted_partial_structure() {
        let record = parse_response(
            "X",
            "Result: {'niveaux': 2, 'type_immeuble': 'individuel'} thanks",
        );
        assert!(record.error_state.is_none());
        assert_eq!(record.levels, Some(2));
        assert_eq!(record.building_type, Some(BuildingType::Individual));
        assert_eq!(record.category, None);
        assert_eq!(record.description, None);
        assert_eq!(record.maintenance_coefficient, None);
        assert_eq!(record.neighborhood_coefficient, None);
        assert_eq!(record.abatement_coefficient, None);
    }

    #[test]
    fn test_no_structure_is_parse_error_with_raw_text() {
        for text in ["", "Je ne peux pas analyser cette image.", "} reversed {", "{ only open"] {
            let record = parse_response("X", text);
            let error = record.error_state.expect("error state must be set");
            assert_eq!(error.kind, ErrorKind::Parse);
            assert_eq!(error.raw.as_deref(), Some(text));
        }
    }

    #[test]
    fn test_malformed_structure_keeps_raw_text() {
        let text = "{'niveaux': ?, 'type_immeuble': 'individuel/collectif'}";
        let record = parse_response("X", text);
        let error = record.error_state.unwrap();
        assert_eq!(error.kind, ErrorKind::Parse);
        assert_eq!(error.raw.as_deref(), Some(text));
    }

    #[test]
    fn test_braces_inside_description_are_tolerated() {
        let text = "{'description': 'Bâtiment {annexe} au fond.', 'niveaux': 1}";
        let record = parse_response("X", text);
        assert!(record.error_state.is_none());
        assert_eq!(record.description.as_deref(), Some("Bâtiment {annexe} au fond."));
        assert_eq!(record.levels, Some(1));
    }

    #[test]
    fn test_braces_in_trailing_commentary_break_extraction() {
        // 启发式切片的已知局限
        let text = "{'niveaux': 1} Remarque: {voir annexe}";
        let record = parse_response("X", text);
        assert!(record.error_state.is_some());
    }

    #[test]
    fn test_out_of_range_values_become_unspecified() {
        let text = r#"{"niveaux": -1, "cenvet": 1.4, "coefficient_voisinage": 0.85,
                       "coefficient_abatement": 0.97, "categorie": "Z"}"#;
        let record = parse_response("X", text);
        assert!(record.error_state.is_none());
        assert_eq!(record.levels, None);
        assert_eq!(record.maintenance_coefficient, None);
        assert_eq!(record.neighborhood_coefficient, None);
        assert_eq!(record.abatement_coefficient, None);
        assert_eq!(record.category, None);
    }

    #[test]
    fn test_lenient_scalar_forms() {
        let text = r#"{"niveaux": "R+1", "cenvet": "0,7", "coefficient_voisinage": "0.9",
                       "categorie": 2, "type_immeuble": "Individuel", "coefficient_abatement": 1}"#;
        let record = parse_response("X", text);
        assert_eq!(record.levels, Some(2));
        assert_eq!(record.maintenance_coefficient, Some(0.7));
        assert_eq!(record.neighborhood_coefficient, Some(0.9));
        assert_eq!(record.category, Some(Category::Two));
        assert_eq!(record.abatement_coefficient, Some(1.0));
    }

    #[test]
    fn test_english_keys_accepted() {
        let text = r#"{"levels": 0, "buildingType": "bare-land", "category": "none"}"#;
        let record = parse_response("X", text);
        assert_eq!(record.levels, Some(0));
        assert_eq!(record.building_type, Some(BuildingType::BareLand));
        assert_eq!(record.category, Some(Category::NotApplicable));
    }

    #[test]
    fn test_inconsistent_category_dropped() {
        let text = "{'type_immeuble': 'collectif', 'categorie': '3'}";
        let record = parse_response("X", text);
        assert_eq!(record.building_type, Some(BuildingType::Collective));
        assert_eq!(record.category, None);
    }

    #[test]
    fn test_non_object_structure() {
        match extract_structure("{'a'}") {
            ParseOutcome::Unstructured { raw, .. } => assert_eq!(raw, "{'a'}"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_deeply_nested_reply_is_parse_error() {
        // 小栈线程上运行，嵌套过深必须报错而不是栈溢出
        let handle = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let depth = 10_000;
                let quoted = format!("{{'niveaux': {}{}}}", "[".repeat(depth), "]".repeat(depth));
                let json = format!("{{\"niveaux\": {}{}}}", "[".repeat(depth), "]".repeat(depth));
                (parse_response("X", &quoted), quoted, parse_response("Y", &json), json)
            })
            .unwrap();
        let (quoted_record, quoted, json_record, json) = handle.join().unwrap();

        for (record, text) in [(quoted_record, quoted), (json_record, json)] {
            let error = record.error_state.unwrap();
            assert_eq!(error.kind, ErrorKind::Parse);
            assert_eq!(error.raw.as_deref(), Some(text.as_str()));
        }
    }
}
