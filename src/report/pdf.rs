//! PDF 绘制
//!
//! 把排版结果画成 PDF。图片嵌入失败只记录警告，不影响文字部分。

use printpdf::image_crate;
use printpdf::{
    BuiltinFont, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerReference,
};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::report::layout::{ImageSlot, ReportLayout};

/// 嵌入图片使用的分辨率
const IMAGE_DPI: f32 = 300.0;
const MM_PER_INCH: f32 = 25.4;

/// 绘制整份报告
pub fn draw(layout: &ReportLayout, page_size: (f32, f32), image: Option<&[u8]>) -> AppResult<Vec<u8>> {
    let (width, height) = page_size;
    let (doc, first_page, first_layer) =
        PdfDocument::new(layout.title.as_str(), Mm(width), Mm(height), "Calque 1");
    let regular = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(render_error)?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(render_error)?;

    for (index, page) in layout.pages.iter().enumerate() {
        let layer = if index == 0 {
            doc.get_page(first_page).get_layer(first_layer)
        } else {
            let (page_ref, layer_ref) =
                doc.add_page(Mm(width), Mm(height), format!("Calque {}", index + 1));
            doc.get_page(page_ref).get_layer(layer_ref)
        };

        for line in page.lines.iter().filter(|l| !l.text.is_empty()) {
            let font: &IndirectFontRef = if line.bold { &bold } else { &regular };
            layer.use_text(line.text.clone(), line.font_size, Mm(line.x), Mm(line.y), font);
        }

        if let (Some(slot), Some(bytes)) = (page.image, image) {
            if let Err(e) = embed_image(&layer, slot, bytes) {
                warn!("图片嵌入失败，报告将不包含图片: {}", e);
            }
        }
    }

    save(doc)
}

fn save(doc: PdfDocumentReference) -> AppResult<Vec<u8>> {
    doc.save_to_bytes().map_err(render_error)
}

/// 按比例缩放图片，使其落在 `slot` 指定的框内
fn embed_image(layer: &PdfLayerReference, slot: ImageSlot, bytes: &[u8]) -> AppResult<()> {
    let decoded = image_crate::load_from_memory(bytes).map_err(render_error)?;
    let (px_width, px_height) = (decoded.width() as f32, decoded.height() as f32);
    if px_width == 0.0 || px_height == 0.0 {
        return Err(AppError::Render("图片尺寸为 0".into()));
    }

    let natural_width = px_width * MM_PER_INCH / IMAGE_DPI;
    let natural_height = px_height * MM_PER_INCH / IMAGE_DPI;
    let scale = (slot.width / natural_width).min(slot.height / natural_height);
    let drawn_height = natural_height * scale;

    debug!(
        "嵌入图片: {}x{} px, 缩放 {:.3}, 位置 ({:.1}, {:.1}) mm",
        px_width, px_height, scale, slot.x, slot.y
    );

    Image::from_dynamic_image(&decoded).add_to_layer(
        layer.clone(),
        ImageTransform {
            translate_x: Some(Mm(slot.x)),
            // 图片顶边与预留区域顶边对齐
            translate_y: Some(Mm(slot.y + slot.height - drawn_height)),
            scale_x: Some(scale),
            scale_y: Some(scale),
            dpi: Some(IMAGE_DPI),
            ..Default::default()
        },
    );
    Ok(())
}

fn render_error(err: impl std::fmt::Display) -> AppError {
    AppError::Render(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AssessmentRecord;
    use crate::report::layout::{layout_not_found, layout_record, LayoutConfig};

    #[test]
    fn test_draw_produces_pdf() {
        let config = LayoutConfig::default();
        let layout = layout_record(&AssessmentRecord::empty("0001"), config, false);
        let bytes = draw(&layout, (config.page_width, config.page_height), None).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn test_invalid_image_is_not_fatal() {
        let config = LayoutConfig::default();
        let layout = layout_record(&AssessmentRecord::empty("0001"), config, true);
        let bytes = draw(
            &layout,
            (config.page_width, config.page_height),
            Some(&b"definitely not an image"[..]),
        )
        .unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn test_real_image_is_embedded() {
        let mut png = std::io::Cursor::new(Vec::new());
        image_crate::DynamicImage::ImageRgb8(image_crate::RgbImage::new(40, 30))
            .write_to(&mut png, image_crate::ImageOutputFormat::Png)
            .unwrap();

        let config = LayoutConfig::default();
        let layout = layout_record(&AssessmentRecord::empty("0001"), config, true);
        let size = (config.page_width, config.page_height);
        let with_image = draw(&layout, size, Some(png.get_ref().as_slice())).unwrap();
        let without_image = draw(&layout, size, None).unwrap();
        assert!(with_image.starts_with(b"%PDF"));
        assert!(with_image.len() > without_image.len());
    }

    #[test]
    fn test_placeholder_pdf() {
        let config = LayoutConfig::default();
        let layout = layout_not_found("ZZZ", config);
        let bytes = draw(&layout, (config.page_width, config.page_height), None).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}
