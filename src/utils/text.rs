//! 文本归一化工具

/// 去掉法语重音、转小写、把 `_` / `-` 统一成空格并压缩空白
///
/// 用于匹配分析服务返回的枚举取值与字段名
pub fn fold(input: &str) -> String {
    let lowered: String = input
        .trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'à' | 'â' | 'ä' | 'á' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' | 'í' => 'i',
            'ô' | 'ö' | 'ó' => 'o',
            'ù' | 'û' | 'ü' | 'ú' => 'u',
            'ç' => 'c',
            '_' | '-' => ' ',
            other => other,
        })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}
