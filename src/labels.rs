// 该文件是 Guanshan （关山） 项目的一部分。
// src/labels.rs - 标签文件解析
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("无法打开标签文件 {path}: {source}")]
  FileOpen {
    path: String,
    source: std::io::Error,
  },
}

/// 类别标签表
///
/// 由标签文件的 `names:` 段落解析得到，按类别 ID 顺序排列。
/// 启动时加载一次，之后只读。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassList {
  names: Vec<String>,
}

const UNKNOWN_LABEL: &str = "unknown";

impl ClassList {
  pub fn from_names(names: Vec<String>) -> Self {
    ClassList { names }
  }

  /// 从标签文件加载类别表。
  ///
  /// 文件打不开时返回 [`LabelError::FileOpen`]；找不到 `names:`
  /// 段落时静默返回空表。
  pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| LabelError::FileOpen {
      path: path.display().to_string(),
      source,
    })?;

    let list = Self::parse_names(&text);
    if list.is_empty() {
      warn!("标签文件 {} 中没有解析出任何类别", path.display());
    } else {
      debug!("从 {} 解析出 {} 个类别", path.display(), list.len());
    }

    Ok(list)
  }

  /// 逐行扫描 `names:` 段落。
  ///
  /// 不是完整的 YAML 解析器：先找到第一个含 `names:` 子串的行，
  /// 段落从下一行开始；之后第一个不含冒号的行（含空行）结束段落。
  /// 段落内每行取第一个冒号之后的文本，去掉首尾空白后按行序追加。
  /// 段落一直到文件尾都未结束时同样得到空表。
  pub fn parse_names(text: &str) -> Self {
    let lines: Vec<&str> = text.lines().collect();

    let mut start = 0usize;
    let mut end = 0usize;
    for (i, line) in lines.iter().enumerate() {
      if line.contains("names:") {
        start = i + 1;
      } else if start > 0 && !line.contains(':') {
        end = i;
        break;
      }
    }

    let mut names = Vec::new();
    for line in lines.iter().take(end).skip(start) {
      let value = line.split_once(':').map_or(*line, |(_, rest)| rest);
      names.push(value.trim().to_string());
    }

    ClassList { names }
  }

  /// 按类别 ID 查名，越界返回 `None`。
  pub fn name(&self, id: usize) -> Option<&str> {
    self.names.get(id).map(String::as_str)
  }

  /// 按类别 ID 查名，越界回落到 `"unknown"`。
  pub fn label_for(&self, id: usize) -> &str {
    self.name(id).unwrap_or(UNKNOWN_LABEL)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_names_section_in_order() {
    let text = "path: data\nnc: 3\nnames:\n  0: person\n  1: bicycle\n  2: car\n\ntail";
    let list = ClassList::parse_names(text);
    assert_eq!(list.len(), 3);
    assert_eq!(list.name(0), Some("person"));
    assert_eq!(list.name(1), Some("bicycle"));
    assert_eq!(list.name(2), Some("car"));
  }

  #[test]
  fn trims_whitespace_around_names() {
    let text = "names:\n  0:   sports ball  \n  1:\ttie\nend";
    let list = ClassList::parse_names(text);
    assert_eq!(list.name(0), Some("sports ball"));
    assert_eq!(list.name(1), Some("tie"));
  }

  #[test]
  fn keeps_text_after_first_colon_only() {
    // 段落内的行按第一个冒号切分，值里允许再出现冒号
    let text = "names:\n  0: note: odd\nend";
    let list = ClassList::parse_names(text);
    assert_eq!(list.name(0), Some("note: odd"));
  }

  #[test]
  fn missing_names_section_yields_empty_list() {
    let text = "path: data\nnc: 80\n";
    let list = ClassList::parse_names(text);
    assert!(list.is_empty());
  }

  #[test]
  fn blank_line_terminates_section() {
    let text = "names:\n  0: person\n\n  1: bicycle\nend";
    let list = ClassList::parse_names(text);
    assert_eq!(list.len(), 1);
    assert_eq!(list.name(0), Some("person"));
  }

  #[test]
  fn unterminated_section_yields_empty_list() {
    // 段落一直持续到文件尾、从未遇到无冒号行
    let text = "names:\n  0: person\n  1: bicycle";
    let list = ClassList::parse_names(text);
    assert!(list.is_empty());
  }

  #[test]
  fn later_names_line_resets_section_start() {
    let text = "names:\n  0: stale\nclass_names:\n  0: person\nend";
    let list = ClassList::parse_names(text);
    // `class_names:` 同样含 `names:` 子串，段落起点被重置
    assert_eq!(list.len(), 1);
    assert_eq!(list.name(0), Some("person"));
  }

  #[test]
  fn label_for_falls_back_on_out_of_range_id() {
    let list = ClassList::from_names(vec!["person".into()]);
    assert_eq!(list.label_for(0), "person");
    assert_eq!(list.label_for(7), "unknown");
  }

  #[test]
  fn from_yaml_file_reports_open_error() {
    let err = ClassList::from_yaml_file("/nonexistent/guanshan/labels.yaml").unwrap_err();
    assert!(matches!(err, LabelError::FileOpen { .. }));
  }

  #[test]
  fn from_yaml_file_reads_fixture() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("labels.yaml");
    std::fs::write(&path, "names:\n  0: rat\n  1: cat\n\n").unwrap();
    let list = ClassList::from_yaml_file(&path).unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list.name(1), Some("cat"));
  }
}
