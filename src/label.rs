// 该文件是 Beifeng （北风） 项目的一部分。
// src/label.rs - 类别标签表
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use tracing::{debug, error};

/// 类别名称表，行号即类别编号
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
  names: Vec<String>,
}

impl LabelTable {
  /// 读取标签文件，每行一个类别名称
  pub fn read(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).inspect_err(|e| {
      error!("无法读取标签文件 {}: {}", path.display(), e);
    })?;
    let table = Self::from_names(content.lines());
    debug!("读取到 {} 个类别标签", table.len());
    Ok(table)
  }

  pub fn from_names<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  pub fn get(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
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
