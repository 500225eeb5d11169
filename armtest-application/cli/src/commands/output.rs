//! CLI 通用输出格式化模块
//!
//! 提供 table/json/yaml 三种输出格式的通用实现

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

/// 可输出为表格行的数据 trait
pub trait TableRow {
    /// 返回表格列标题
    fn headers() -> Vec<&'static str>;

    /// 返回该项的表格行数据
    fn row(&self) -> Vec<String>;

    /// 列宽
    fn widths() -> Vec<usize> {
        Self::headers().iter().map(|_| 20).collect()
    }
}

fn format_line(cells: &[String], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths.iter().chain(std::iter::repeat(&20)))
        .map(|(c, w)| format!("{:<width$}", c, width = *w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// 表格格式输出
pub fn print_table<T: TableRow>(items: &[T]) {
    let widths = T::widths();
    let headers: Vec<String> = T::headers().iter().map(|h| h.to_string()).collect();

    let header_line = format_line(&headers, &widths);
    println!("{}", header_line.bold());
    println!("{}", "-".repeat(header_line.chars().count()));

    for item in items {
        println!("{}", format_line(&item.row(), &widths));
    }
}

/// JSON 格式输出
pub fn print_json<T: Serialize>(items: &[T]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(items)?);
    Ok(())
}

/// YAML 格式输出
pub fn print_yaml<T: Serialize>(items: &[T]) -> Result<()> {
    print!("{}", serde_yaml::to_string(items)?);
    Ok(())
}

/// 根据格式参数选择输出方式
pub fn output_formatted<T: TableRow + Serialize>(items: &[T], format: &str) -> Result<()> {
    match format {
        "json" => print_json(items)?,
        "yaml" | "yml" => print_yaml(items)?,
        "table" => print_table(items),
        other => anyhow::bail!("不支持的输出格式: {} (可选 table/json/yaml)", other),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line_pads_columns() {
        let line = format_line(&["a".to_string(), "bb".to_string()], &[3, 4]);
        assert_eq!(line, "a   bb  ");
    }
}
