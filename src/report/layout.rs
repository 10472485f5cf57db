//! 报告排版
//!
//! 纯计算，不依赖 PDF 库：把一条记录排成若干页文字行和一个图片位置。
//! 坐标单位为毫米，原点在页面左下角（与 PDF 一致）。

use regex::Regex;
use std::sync::OnceLock;

use crate::models::AssessmentRecord;

/// 页面几何与字号
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutConfig {
    pub page_width: f32,
    pub page_height: f32,
    pub margin_top: f32,
    pub margin_bottom: f32,
    pub margin_left: f32,
    pub line_height: f32,
    pub title_size: f32,
    pub body_size: f32,
    /// 描述文字每行最大字符数（含项目符号缩进）
    pub wrap_width: usize,
    pub image_width: f32,
    pub image_height: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            page_width: 210.0,
            page_height: 297.0,
            margin_top: 20.0,
            margin_bottom: 20.0,
            margin_left: 20.0,
            line_height: 8.0,
            title_size: 16.0,
            body_size: 11.0,
            wrap_width: 90,
            image_width: 120.0,
            image_height: 90.0,
        }
    }
}

impl LayoutConfig {
    pub fn with_wrap_width(mut self, wrap_width: usize) -> Self {
        self.wrap_width = wrap_width;
        self
    }

    fn top(&self) -> f32 {
        self.page_height - self.margin_top
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub x: f32,
    /// 文字基线
    pub y: f32,
    pub text: String,
    pub font_size: f32,
    pub bold: bool,
}

/// 图片位置（左下角）与尺寸上限
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageSlot {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    pub lines: Vec<TextLine>,
    pub image: Option<ImageSlot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportLayout {
    pub title: String,
    pub pages: Vec<PageLayout>,
}

impl ReportLayout {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn lines(&self) -> impl Iterator<Item = &TextLine> {
        self.pages.iter().flat_map(|page| page.lines.iter())
    }
}

/// 写入游标：越过下边距时自动换页
struct Cursor {
    config: LayoutConfig,
    pages: Vec<PageLayout>,
    y: f32,
}

impl Cursor {
    fn new(config: LayoutConfig) -> Self {
        Self {
            config,
            pages: vec![PageLayout::default()],
            y: config.top(),
        }
    }

    fn new_page(&mut self) {
        self.pages.push(PageLayout::default());
        self.y = self.config.top();
    }

    fn current(&mut self) -> &mut PageLayout {
        // pages 初始化时至少有一页
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }

    fn line(&mut self, text: impl Into<String>, font_size: f32, bold: bool, indent: f32) {
        if self.y < self.config.margin_bottom {
            self.new_page();
        }
        let line = TextLine {
            x: self.config.margin_left + indent,
            y: self.y,
            text: text.into(),
            font_size,
            bold,
        };
        self.current().lines.push(line);
        self.y -= self.config.line_height;
    }

    /// 折行后逐行写入
    fn wrapped(&mut self, text: &str, font_size: f32, bold: bool, width: usize) {
        for line in wrap_line(text, width) {
            self.line(line, font_size, bold, 0.0);
        }
    }

    /// 在游标下方预留图片区域，放不下则换页
    fn image(&mut self) {
        let height = self.config.image_height;
        if self.y - height < self.config.margin_bottom {
            self.new_page();
        }
        let slot = ImageSlot {
            x: self.config.margin_left,
            y: self.y - height,
            width: self.config.image_width,
            height,
        };
        self.current().image = Some(slot);
        self.y -= height + self.config.line_height;
    }

    fn finish(self) -> Vec<PageLayout> {
        self.pages
    }
}

const BULLET: &str = "- ";
const CONTINUATION: &str = "  ";

/// 按句末标点（. ! ?）切分描述，标点保留在句尾
pub fn split_sentences(text: &str) -> Vec<String> {
    static SENTENCE: OnceLock<Regex> = OnceLock::new();
    let re = SENTENCE.get_or_init(|| Regex::new(r"[^.!?]+[.!?]*|[.!?]+").expect("valid regex"));
    re.find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// 按字符宽度折行，续行缩进两格，每行（含缩进）不超过 `width` 个字符
pub fn wrap_line(text: &str, width: usize) -> Vec<String> {
    let width = width.max(CONTINUATION.chars().count() + 1);
    let options = textwrap::Options::new(width).subsequent_indent(CONTINUATION);
    textwrap::wrap(text, options)
        .into_iter()
        .map(|line| line.into_owned())
        .collect()
}

/// 标题字号较大，按字号比例缩小每行字符数
fn title_width(config: &LayoutConfig) -> usize {
    ((config.wrap_width as f32) * config.body_size / config.title_size) as usize
}

/// 把一句话折成带项目符号的若干行，每行（含前缀）不超过 `width` 个字符
pub fn bullet_lines(sentence: &str, width: usize) -> Vec<String> {
    let inner = width.saturating_sub(BULLET.chars().count()).max(1);
    textwrap::wrap(sentence, inner)
        .into_iter()
        .enumerate()
        .map(|(i, line)| {
            let prefix = if i == 0 { BULLET } else { CONTINUATION };
            format!("{}{}", prefix, line)
        })
        .collect()
}

/// 排版一条记录
///
/// 字段顺序固定：标识、类型、等级、层数、描述、三个系数；
/// `with_image` 为真时在末尾预留图片位置
pub fn layout_record(record: &AssessmentRecord, config: LayoutConfig, with_image: bool) -> ReportLayout {
    let title = format!("Rapport d'évaluation cadastrale - NICAD {}", record.identifier);
    let mut cursor = Cursor::new(config);
    cursor.wrapped(&title, config.title_size, true, title_width(&config));
    cursor.line("", config.body_size, false, 0.0);

    let fields = [
        ("NICAD", record.identifier.clone()),
        ("Type d'immeuble", record.building_type_label()),
        ("Catégorie", record.category_label()),
        ("Niveaux", record.levels_label()),
    ];
    for (label, value) in fields {
        cursor.wrapped(&format!("{} : {}", label, value), config.body_size, false, config.wrap_width);
    }

    match &record.description {
        Some(description) => {
            cursor.line("Description :", config.body_size, false, 0.0);
            for sentence in split_sentences(description) {
                for line in bullet_lines(&sentence, config.wrap_width) {
                    cursor.line(line, config.body_size, false, 5.0);
                }
            }
        }
        None => cursor.wrapped(
            &format!("Description : {}", record.description_label()),
            config.body_size,
            false,
            config.wrap_width,
        ),
    }

    let coefficients = [
        ("Coefficient d'entretien (CENVET)", record.maintenance_label()),
        ("Coefficient de voisinage", record.neighborhood_label()),
        ("Coefficient d'abattement", record.abatement_label()),
    ];
    for (label, value) in coefficients {
        cursor.wrapped(&format!("{} : {}", label, value), config.body_size, false, config.wrap_width);
    }

    if let Some(error) = &record.error_state {
        cursor.line("", config.body_size, false, 0.0);
        cursor.wrapped(
            &format!("Analyse incomplète : {}", error.message),
            config.body_size,
            true,
            config.wrap_width,
        );
    }

    if with_image {
        cursor.image();
    }

    ReportLayout {
        title,
        pages: cursor.finish(),
    }
}

/// 标识既无记录也无源图片时的占位报告
pub fn layout_not_found(identifier: &str, config: LayoutConfig) -> ReportLayout {
    let title = format!("Rapport d'évaluation cadastrale - NICAD {}", identifier);
    let mut cursor = Cursor::new(config);
    cursor.wrapped(&title, config.title_size, true, title_width(&config));
    cursor.line("", config.body_size, false, 0.0);
    cursor.wrapped(
        &format!("Aucune donnée trouvée pour le NICAD {}.", identifier),
        config.body_size,
        false,
        config.wrap_width,
    );
    ReportLayout {
        title,
        pages: cursor.finish(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BuildingType, Category};

    fn record_with_description(description: &str) -> AssessmentRecord {
        AssessmentRecord {
            levels: Some(2),
            building_type: Some(BuildingType::Individual),
            category: Some(Category::Three),
            description: Some(description.to_string()),
            maintenance_coefficient: Some(0.7),
            neighborhood_coefficient: Some(0.9),
            abatement_coefficient: Some(0.8),
            ..AssessmentRecord::empty("0042")
        }
    }

    fn without_whitespace(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn test_split_sentences() {
        let parts = split_sentences("Maison en béton. Toit plat! Bon état? fin sans point");
        assert_eq!(
            parts,
            vec!["Maison en béton.", "Toit plat!", "Bon état?", "fin sans point"]
        );
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn test_wrapping_respects_width_and_keeps_characters() {
        let sentence = "Bâtiment résidentiel de deux niveaux construit en parpaings de ciment, \
                        avec une façade enduite et peinte en ocre, des menuiseries métalliques \
                        et une terrasse accessible au dernier niveau.";
        let width = 30;
        let lines = bullet_lines(sentence, width);

        assert!(lines.len() > 1);
        for line in &lines {
            assert!(line.chars().count() <= width, "line too long: {:?}", line);
        }
        assert!(lines[0].starts_with(BULLET));
        assert!(lines[1..].iter().all(|l| l.starts_with(CONTINUATION)));

        let rejoined: String = lines
            .iter()
            .map(|l| &l[2..])
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(without_whitespace(&rejoined), without_whitespace(sentence));
    }

    #[test]
    fn test_long_word_is_split_not_dropped() {
        let word = "a".repeat(50);
        let lines = bullet_lines(&word, 20);
        assert!(lines.iter().all(|l| l.chars().count() <= 20));
        let total: usize = lines.iter().map(|l| l.trim_start_matches(['-', ' ']).len()).sum();
        assert_eq!(total, 50);
    }

    #[test]
    fn test_field_order() {
        let layout = layout_record(&record_with_description("Une phrase."), LayoutConfig::default(), false);
        let texts: Vec<&str> = layout.lines().map(|l| l.text.as_str()).collect();
        let position = |needle: &str| texts.iter().position(|t| t.starts_with(needle)).unwrap();

        assert!(position("NICAD") < position("Type d'immeuble"));
        assert!(position("Type d'immeuble") < position("Catégorie"));
        assert!(position("Catégorie") < position("Niveaux"));
        assert!(position("Niveaux") < position("Description"));
        assert!(position("Description") < position("- Une phrase."));
        assert!(position("- Une phrase.") < position("Coefficient d'entretien"));
        assert!(position("Coefficient d'entretien") < position("Coefficient de voisinage"));
        assert!(position("Coefficient de voisinage") < position("Coefficient d'abattement"));
    }

    #[test]
    fn test_cursor_moves_down_by_line_height() {
        let config = LayoutConfig::default();
        let layout = layout_record(&record_with_description("Court."), config, false);
        let ys: Vec<f32> = layout.pages[0].lines.iter().map(|l| l.y).collect();
        assert_eq!(ys[0], config.page_height - config.margin_top);
        for pair in ys.windows(2) {
            assert!((pair[0] - pair[1] - config.line_height).abs() < 1e-3);
        }
    }

    #[test]
    fn test_long_description_paginates() {
        let config = LayoutConfig::default();
        let description = "Phrase numéro un assez longue pour occuper une ligne entière. ".repeat(60);
        let layout = layout_record(&record_with_description(&description), config, true);

        assert!(layout.page_count() > 1);
        for line in layout.lines() {
            assert!(line.y >= config.margin_bottom, "line below bottom margin: {:?}", line);
            assert!(line.y <= config.page_height - config.margin_top);
        }
        // 续页从上边距开始
        assert_eq!(layout.pages[1].lines[0].y, config.page_height - config.margin_top);
        // 每个字段只出现一次
        assert_eq!(layout.lines().filter(|l| l.text.starts_with("Coefficient d'abattement")).count(), 1);
        let image = layout.pages.last().unwrap().image.unwrap();
        assert!(image.y >= config.margin_bottom);
    }

    #[test]
    fn test_image_slot_only_when_requested() {
        let record = record_with_description("Court.");
        assert!(layout_record(&record, LayoutConfig::default(), false)
            .pages
            .iter()
            .all(|p| p.image.is_none()));
        assert!(layout_record(&record, LayoutConfig::default(), true).pages[0].image.is_some());
    }

    #[test]
    fn test_unspecified_and_error_lines() {
        let record = AssessmentRecord::failed(
            "0099",
            crate::models::ErrorState::new(crate::models::ErrorKind::Parse, "aucune structure"),
        );
        let layout = layout_record(&record, LayoutConfig::default(), false);
        let texts: Vec<&str> = layout.lines().map(|l| l.text.as_str()).collect();
        assert!(texts.contains(&"Niveaux : Non précisé"));
        assert!(texts.contains(&"Description : Non précisé"));
        assert!(texts.iter().any(|t| t.contains("aucune structure")));
    }

    #[test]
    fn test_not_found_layout() {
        let layout = layout_not_found("ABC", LayoutConfig::default());
        assert_eq!(layout.page_count(), 1);
        assert!(layout.lines().any(|l| l.text.contains("Aucune donnée trouvée pour le NICAD ABC")));
    }

    #[test]
    fn test_long_error_and_title_are_wrapped() {
        let config = LayoutConfig::default();
        let message = "le service a renvoyé une réponse inexploitable ".repeat(8);
        let identifier = "N".repeat(150);
        let record = AssessmentRecord::failed(
            identifier.clone(),
            crate::models::ErrorState::new(crate::models::ErrorKind::ExternalService, message.clone()),
        );
        let layout = layout_record(&record, config, false);

        for line in layout.lines() {
            let limit = if line.font_size == config.title_size {
                title_width(&config)
            } else {
                config.wrap_width
            };
            assert!(line.text.chars().count() <= limit, "line too long: {:?}", line.text);
        }

        let error_lines: Vec<&str> = layout
            .lines()
            .map(|l| l.text.as_str())
            .skip_while(|t| !t.starts_with("Analyse incomplète"))
            .collect();
        assert!(error_lines.len() > 1);
        assert_eq!(
            without_whitespace(&error_lines.concat()),
            without_whitespace(&format!("Analyse incomplète : {}", message))
        );

        let title_lines = layout.lines().filter(|l| l.font_size == config.title_size).count();
        assert!(title_lines > 1);
    }
}
