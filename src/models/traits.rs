use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::models::property::{
    PropertyError, PropertyRow, PropertyValue, RealizedProperties, SharedCatalog,
};

/// デバイスの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Sensor,
    Module,
    Detector,
    Emitter,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceKind::Sensor => "sensor",
            DeviceKind::Module => "module",
            DeviceKind::Detector => "detector",
            DeviceKind::Emitter => "emitter",
        };
        write!(f, "{}", s)
    }
}

/// どちらの値を読むか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// 設計値（分布の平均）。フィットはこちらのみを参照する
    Design,
    /// デバイス構築時に実現された真の値
    Realized,
}

/// 実現値の生成方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// 分布からサンプリング
    #[default]
    Sampled,
    /// 常に平均値
    Exact,
}

/// 全デバイスに共通する状態
///
/// 共有カタログへの参照と、このインスタンスが所有する実現値を保持します。
#[derive(Debug)]
pub struct DeviceCore {
    pub id: usize,
    pub mode: SamplingMode,
    catalog: SharedCatalog,
    properties: RealizedProperties,
}

impl DeviceCore {
    /// カタログの全プロパティを実現してデバイスの状態を作成
    pub fn build<R: Rng + ?Sized>(
        id: usize,
        catalog: &SharedCatalog,
        mode: SamplingMode,
        rng: &mut R,
    ) -> Result<Self, PropertyError> {
        let properties = catalog.borrow_mut().realize_all(mode, rng)?;
        Ok(Self {
            id,
            mode,
            catalog: SharedCatalog::clone(catalog),
            properties,
        })
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    pub fn get_value(&self, name: &str, kind: ValueKind) -> Result<PropertyValue, PropertyError> {
        match kind {
            ValueKind::Design => self.catalog.borrow().design_value(name),
            ValueKind::Realized => self.properties.get(name),
        }
    }

    pub fn set_value(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        self.properties.set(name, value)
    }

    pub fn property_rows(&self) -> Vec<PropertyRow> {
        let catalog = self.catalog.borrow();
        catalog
            .iter()
            .filter_map(|d| {
                let value = self.properties.get(&d.name).ok()?;
                Some(PropertyRow {
                    name: d.name.clone(),
                    description: d.description.clone(),
                    property_type: d.property_type,
                    distribution: d.distribution,
                    mean: d.mean,
                    sigma: d.sigma,
                    offset: d.offset(),
                    value,
                })
            })
            .collect()
    }
}

/// 全ての物理デバイス（センサー、モジュール、検出器、エミッター）が実装するインターフェース
pub trait IDevice {
    /// 共通状態
    fn core(&self) -> &DeviceCore;

    fn core_mut(&mut self) -> &mut DeviceCore;

    /// デバイスの種類
    fn kind(&self) -> DeviceKind;

    /// デバイスIDの取得
    fn get_id(&self) -> usize {
        self.core().id
    }

    /// プロパティ値の取得
    fn get_value(&self, name: &str, kind: ValueKind) -> Result<PropertyValue, PropertyError> {
        self.core().get_value(name, kind)
    }

    /// 数値プロパティの取得
    fn get_f64(&self, name: &str, kind: ValueKind) -> Result<f64, PropertyError> {
        Ok(self.get_value(name, kind)?.as_f64())
    }

    /// boolプロパティの取得（bool以外は型不一致エラー）
    fn get_bool(&self, name: &str, kind: ValueKind) -> Result<bool, PropertyError> {
        let value = self.get_value(name, kind)?;
        value.as_bool().ok_or_else(|| PropertyError::TypeMismatch {
            name: name.to_string(),
            expected: crate::models::property::PropertyType::Bool,
            found: value.property_type(),
        })
    }

    /// 実現値の変更（型を検証）
    fn set_value(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        self.core_mut().set_value(name, value)
    }

    /// レポート用のプロパティ行
    fn property_rows(&self) -> Vec<PropertyRow> {
        self.core().property_rows()
    }
}
