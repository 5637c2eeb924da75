//! # Property モジュール
//!
//! 物理量の設計値（分布）と、デバイスごとに実現された値を管理します。
//!
//! - [`PropertyDescriptor`]: 名前・説明・型・分布・平均・σ・オフセットを持つ設計プロパティ
//! - [`RealizedProperty`]: デバイス構築時に分布からサンプリングされた1つの値
//! - [`PropertyCatalog`]: デバイス種別ごとの設計プロパティの集合
//!
//! 設計プロパティは自分から実現された値への非所有参照（`Weak`）を保持し、
//! [`PropertyCatalog::set_offset`] の呼び出し1回で全ての依存インスタンスへ
//! オフセットの差分を同期的に反映します。

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::str::FromStr;

use rand::Rng;
use rand_distr::{Beta, Distribution as _, Gamma, Normal, Uniform};
use thiserror::Error;

use crate::models::traits::{DeviceKind, SamplingMode};

/// プロパティの値の型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    Int,
    Float,
    Bool,
}

impl FromStr for PropertyType {
    type Err = PropertyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "int" => Ok(PropertyType::Int),
            "float" => Ok(PropertyType::Float),
            "bool" => Ok(PropertyType::Bool),
            _ => Err(PropertyError::UnknownType(s.to_string())),
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PropertyType::Int => "int",
            PropertyType::Float => "float",
            PropertyType::Bool => "bool",
        };
        write!(f, "{}", s)
    }
}

/// 実現値を決める確率分布の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    /// 常に平均値
    Exact,
    Normal,
    Gamma,
    /// 平均値は (0,1) の範囲
    Beta,
    /// 平均と σ が一致する一様分布
    Uniform,
}

impl FromStr for Distribution {
    type Err = PropertyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(Distribution::Exact),
            "norm" | "normal" => Ok(Distribution::Normal),
            "gamma" => Ok(Distribution::Gamma),
            "beta" => Ok(Distribution::Beta),
            "uniform" => Ok(Distribution::Uniform),
            _ => Err(PropertyError::UnknownDistribution(s.to_string())),
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Distribution::Exact => "exact",
            Distribution::Normal => "norm",
            Distribution::Gamma => "gamma",
            Distribution::Beta => "beta",
            Distribution::Uniform => "uniform",
        };
        write!(f, "{}", s)
    }
}

/// 型付きのスカラー値
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl PropertyValue {
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::Int(_) => PropertyType::Int,
            PropertyValue::Float(_) => PropertyType::Float,
            PropertyValue::Bool(_) => PropertyType::Bool,
        }
    }

    /// 数値として取り出す（boolは 0/1）
    pub fn as_f64(&self) -> f64 {
        match *self {
            PropertyValue::Int(v) => v as f64,
            PropertyValue::Float(v) => v,
            PropertyValue::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            PropertyValue::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            PropertyValue::Int(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::Float(v) => write!(f, "{:.6}", v),
            PropertyValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// プロパティ関連のエラー
///
/// いずれも構築時の致命的エラーで、部分的に構築されたデバイスは返されません。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropertyError {
    #[error("不明なプロパティ型: {0} (利用可能: int/float/bool)")]
    UnknownType(String),
    #[error("不明な分布: {0} (利用可能: exact/norm/gamma/beta/uniform)")]
    UnknownDistribution(String),
    #[error("プロパティ {name}: beta分布の平均値 {mean} が範囲 (0,1) の外です")]
    BetaMeanOutOfRange { name: String, mean: f64 },
    #[error("プロパティ {name}: 分布パラメータが不正です ({reason})")]
    InvalidParameters { name: String, reason: String },
    #[error("プロパティ名が重複しています: {0}")]
    DuplicateName(String),
    #[error("プロパティ {name}: 値の型 {found} が宣言型 {expected} と一致しません")]
    TypeMismatch {
        name: String,
        expected: PropertyType,
        found: PropertyType,
    },
    #[error("プロパティが見つかりません: {0}")]
    UnknownProperty(String),
    #[error("{kind} のプロパティ {name} は exact 分布の int 型である必要があります")]
    NotFixedCount { kind: DeviceKind, name: String },
}

/// 実現値（真の値）
///
/// デバイス構築時に一度だけ生成されます。値の変更は型を検証する
/// [`RealizedProperty::set_value`] のみを通して行います。
#[derive(Debug, Clone, PartialEq)]
pub struct RealizedProperty {
    pub name: String,
    pub property_type: PropertyType,
    value: PropertyValue,
}

impl RealizedProperty {
    pub fn new(name: &str, value: PropertyValue) -> Self {
        Self {
            name: name.to_string(),
            property_type: value.property_type(),
            value,
        }
    }

    pub fn value(&self) -> PropertyValue {
        self.value
    }

    /// 値を変更（型が一致しない場合はエラー）
    pub fn set_value(&mut self, new_value: PropertyValue) -> Result<(), PropertyError> {
        if new_value.property_type() != self.property_type {
            return Err(PropertyError::TypeMismatch {
                name: self.name.clone(),
                expected: self.property_type,
                found: new_value.property_type(),
            });
        }
        self.value = new_value;
        Ok(())
    }

    fn shift(&mut self, delta: f64) {
        if let PropertyValue::Float(v) = self.value {
            self.value = PropertyValue::Float(v + delta);
        }
    }
}

/// 実現値への共有ハンドル（所有はデバイス側）
pub type RealizedHandle = Rc<RefCell<RealizedProperty>>;

/// 設計プロパティ
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub name: String,
    pub description: String,
    pub property_type: PropertyType,
    pub distribution: Distribution,
    pub mean: PropertyValue,
    pub sigma: f64,
    offset: f64,
    dependents: Vec<Weak<RefCell<RealizedProperty>>>,
}

impl PropertyDescriptor {
    /// 設計プロパティを作成
    ///
    /// # エラー
    ///
    /// * 平均値の型が宣言型と一致しない
    /// * beta分布の平均値が (0,1) の外、または σ が大きすぎる
    /// * σ が負、bool型に exact 以外の分布を指定した、など
    pub fn new(
        name: &str,
        description: &str,
        property_type: PropertyType,
        distribution: Distribution,
        mean: PropertyValue,
        sigma: f64,
    ) -> Result<Self, PropertyError> {
        if mean.property_type() != property_type {
            return Err(PropertyError::TypeMismatch {
                name: name.to_string(),
                expected: property_type,
                found: mean.property_type(),
            });
        }
        let invalid = |reason: &str| PropertyError::InvalidParameters {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if !sigma.is_finite() || sigma < 0.0 {
            return Err(invalid("sigma must be finite and non-negative"));
        }
        if property_type == PropertyType::Bool && distribution != Distribution::Exact {
            return Err(invalid("bool properties must use the exact distribution"));
        }

        let m = mean.as_f64();
        match distribution {
            Distribution::Beta => {
                if m <= 0.0 || m >= 1.0 {
                    return Err(PropertyError::BetaMeanOutOfRange {
                        name: name.to_string(),
                        mean: m,
                    });
                }
                if sigma > 0.0 && sigma * sigma >= m * (1.0 - m) {
                    return Err(invalid("beta sigma^2 must be below mean*(1-mean)"));
                }
            }
            Distribution::Gamma => {
                if sigma > 0.0 && m <= 0.0 {
                    return Err(invalid("gamma mean must be positive"));
                }
            }
            _ => {}
        }

        Ok(Self {
            name: name.to_string(),
            description: description.to_string(),
            property_type,
            distribution,
            mean,
            sigma,
            offset: 0.0,
            dependents: Vec::new(),
        })
    }

    /// 現在のオフセット
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// 生存している依存インスタンスの数
    pub fn dependent_count(&self) -> usize {
        self.dependents.iter().filter(|w| w.strong_count() > 0).count()
    }

    /// 分布に従って値を1つ生成（オフセットは含まない）
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64, PropertyError> {
        let m = self.mean.as_f64();
        let s = self.sigma;
        if self.distribution == Distribution::Exact || s == 0.0 {
            return Ok(m);
        }
        let invalid = |e: String| PropertyError::InvalidParameters {
            name: self.name.clone(),
            reason: e,
        };
        let value = match self.distribution {
            Distribution::Exact => m,
            Distribution::Normal => Normal::new(m, s)
                .map_err(|e| invalid(e.to_string()))?
                .sample(rng),
            Distribution::Gamma => {
                let shape = (m / s).powi(2);
                let scale = s * s / m;
                Gamma::new(shape, scale)
                    .map_err(|e| invalid(e.to_string()))?
                    .sample(rng)
            }
            Distribution::Beta => {
                let term = m * (1.0 - m) / (s * s) - 1.0;
                Beta::new(term * m, term * (1.0 - m))
                    .map_err(|e| invalid(e.to_string()))?
                    .sample(rng)
            }
            Distribution::Uniform => {
                let half = s * 3.0_f64.sqrt();
                Uniform::new(m - half, m + half).sample(rng)
            }
        };
        Ok(value)
    }

    /// 実現値を生成
    ///
    /// `SamplingMode::Exact` の場合は平均値をそのまま使います。
    /// float型には現在のオフセットが加算されます。
    pub fn realize<R: Rng + ?Sized>(
        &self,
        mode: SamplingMode,
        rng: &mut R,
    ) -> Result<RealizedProperty, PropertyError> {
        let value = match (self.mean, mode) {
            (PropertyValue::Bool(b), _) => PropertyValue::Bool(b),
            (mean, SamplingMode::Exact) => match mean {
                PropertyValue::Float(v) => PropertyValue::Float(v + self.offset),
                other => other,
            },
            (PropertyValue::Int(_), SamplingMode::Sampled) => {
                PropertyValue::Int(self.sample(rng)?.round() as i64)
            }
            (PropertyValue::Float(_), SamplingMode::Sampled) => {
                PropertyValue::Float(self.sample(rng)? + self.offset)
            }
        };
        Ok(RealizedProperty::new(&self.name, value))
    }

    fn register(&mut self, handle: &RealizedHandle) {
        self.dependents.retain(|w| w.strong_count() > 0);
        self.dependents.push(Rc::downgrade(handle));
    }
}

/// レポート用のプロパティ行
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRow {
    pub name: String,
    pub description: String,
    pub property_type: PropertyType,
    pub distribution: Distribution,
    pub mean: PropertyValue,
    pub sigma: f64,
    pub offset: f64,
    pub value: PropertyValue,
}

/// デバイス種別ごとの設計プロパティ集合
#[derive(Debug)]
pub struct PropertyCatalog {
    kind: DeviceKind,
    descriptors: Vec<PropertyDescriptor>,
    index: HashMap<String, usize>,
}

/// 複数のデバイスで共有されるカタログ
pub type SharedCatalog = Rc<RefCell<PropertyCatalog>>;

impl PropertyCatalog {
    pub fn new(kind: DeviceKind) -> Self {
        Self {
            kind,
            descriptors: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// 設計プロパティを追加（名前の重複は致命的エラー）
    pub fn add(&mut self, descriptor: PropertyDescriptor) -> Result<(), PropertyError> {
        if self.index.contains_key(&descriptor.name) {
            return Err(PropertyError::DuplicateName(descriptor.name));
        }
        self.index.insert(descriptor.name.clone(), self.descriptors.len());
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// 引数から設計プロパティを作成して追加
    pub fn add_property(
        &mut self,
        name: &str,
        description: &str,
        property_type: PropertyType,
        distribution: Distribution,
        mean: PropertyValue,
        sigma: f64,
    ) -> Result<(), PropertyError> {
        let descriptor =
            PropertyDescriptor::new(name, description, property_type, distribution, mean, sigma)?;
        self.add(descriptor)
    }

    /// float型プロパティを追加する省略形
    pub fn add_float(
        &mut self,
        name: &str,
        description: &str,
        distribution: Distribution,
        mean: f64,
        sigma: f64,
    ) -> Result<(), PropertyError> {
        self.add_property(
            name,
            description,
            PropertyType::Float,
            distribution,
            PropertyValue::Float(mean),
            sigma,
        )
    }

    /// 既存の設計プロパティを置き換える（存在しなければ追加）
    ///
    /// シナリオファイルによるデフォルト値の上書きに使います。
    /// デバイス構築前にのみ呼び出してください。
    pub fn replace(&mut self, descriptor: PropertyDescriptor) {
        match self.index.get(&descriptor.name) {
            Some(&i) => self.descriptors[i] = descriptor,
            None => {
                self.index.insert(descriptor.name.clone(), self.descriptors.len());
                self.descriptors.push(descriptor);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.index.get(name).map(|&i| &self.descriptors[i])
    }

    pub fn descriptor(&self, name: &str) -> Result<&PropertyDescriptor, PropertyError> {
        self.get(name)
            .ok_or_else(|| PropertyError::UnknownProperty(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.descriptors.iter()
    }

    /// 設計値（平均値）
    pub fn design_value(&self, name: &str) -> Result<PropertyValue, PropertyError> {
        Ok(self.descriptor(name)?.mean)
    }

    /// 階層の形を決める個数プロパティ（exact分布のint型）を取得
    pub fn fixed_count(&self, name: &str) -> Result<usize, PropertyError> {
        let descriptor = self.descriptor(name)?;
        match (descriptor.distribution, descriptor.mean) {
            (Distribution::Exact, PropertyValue::Int(n)) if n >= 0 => Ok(n as usize),
            _ => Err(PropertyError::NotFixedCount {
                kind: self.kind,
                name: name.to_string(),
            }),
        }
    }

    /// 全プロパティの実現値を生成し、依存インスタンスとして登録
    pub fn realize_all<R: Rng + ?Sized>(
        &mut self,
        mode: SamplingMode,
        rng: &mut R,
    ) -> Result<RealizedProperties, PropertyError> {
        let mut values = HashMap::with_capacity(self.descriptors.len());
        for descriptor in &self.descriptors {
            let realized = descriptor.realize(mode, rng)?;
            values.insert(descriptor.name.clone(), Rc::new(RefCell::new(realized)));
        }
        // 全て成功してから登録する
        for descriptor in &mut self.descriptors {
            if let Some(handle) = values.get(&descriptor.name) {
                descriptor.register(handle);
            }
        }
        Ok(RealizedProperties { values })
    }

    /// オフセットを変更し、全ての依存インスタンスへ差分を反映
    ///
    /// # 戻り値
    ///
    /// 更新された依存インスタンスの数
    pub fn set_offset(&mut self, name: &str, offset: f64) -> Result<usize, PropertyError> {
        let i = *self
            .index
            .get(name)
            .ok_or_else(|| PropertyError::UnknownProperty(name.to_string()))?;
        let descriptor = &mut self.descriptors[i];
        if descriptor.property_type != PropertyType::Float {
            return Err(PropertyError::TypeMismatch {
                name: name.to_string(),
                expected: PropertyType::Float,
                found: descriptor.property_type,
            });
        }
        let delta = offset - descriptor.offset;
        descriptor.offset = offset;
        descriptor.dependents.retain(|w| w.strong_count() > 0);
        let mut updated = 0;
        for dependent in &descriptor.dependents {
            if let Some(handle) = dependent.upgrade() {
                handle.borrow_mut().shift(delta);
                updated += 1;
            }
        }
        Ok(updated)
    }

    pub fn into_shared(self) -> SharedCatalog {
        Rc::new(RefCell::new(self))
    }
}

/// デバイスが所有する実現値の集合（name → 実現値）
#[derive(Debug, Default)]
pub struct RealizedProperties {
    values: HashMap<String, RealizedHandle>,
}

impl RealizedProperties {
    pub fn get(&self, name: &str) -> Result<PropertyValue, PropertyError> {
        self.values
            .get(name)
            .map(|h| h.borrow().value())
            .ok_or_else(|| PropertyError::UnknownProperty(name.to_string()))
    }

    pub fn set(&self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        let handle = self
            .values
            .get(name)
            .ok_or_else(|| PropertyError::UnknownProperty(name.to_string()))?;
        handle.borrow_mut().set_value(value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;
    use statrs::statistics::Statistics;

    fn float_descriptor(distribution: Distribution, mean: f64, sigma: f64) -> PropertyDescriptor {
        PropertyDescriptor::new(
            "p",
            "test property",
            PropertyType::Float,
            distribution,
            PropertyValue::Float(mean),
            sigma,
        )
        .unwrap()
    }

    fn draw(descriptor: &PropertyDescriptor, n: usize, seed: u64) -> Vec<f64> {
        let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                descriptor
                    .realize(SamplingMode::Sampled, &mut rng)
                    .unwrap()
                    .value()
                    .as_f64()
            })
            .collect()
    }

    #[test]
    fn test_sampling_reproduces_mean_and_sigma() {
        let n = 10_000;
        let cases = [
            (Distribution::Normal, 5.0, 0.5),
            (Distribution::Gamma, 2.0, 0.4),
            (Distribution::Beta, 0.8, 0.05),
            (Distribution::Uniform, -3.0, 1.2),
        ];
        for (i, (distribution, mean, sigma)) in cases.into_iter().enumerate() {
            let samples = draw(&float_descriptor(distribution, mean, sigma), n, 100 + i as u64);
            let sample_mean = samples.iter().mean();
            let sample_sigma = samples.iter().std_dev();
            let mean_tol = 5.0 * sigma / (n as f64).sqrt();
            assert!(
                (sample_mean - mean).abs() < mean_tol,
                "{}: mean {} vs {}",
                distribution,
                sample_mean,
                mean
            );
            assert!(
                (sample_sigma - sigma).abs() < 0.05 * sigma,
                "{}: sigma {} vs {}",
                distribution,
                sample_sigma,
                sigma
            );
        }

        let exact = draw(&float_descriptor(Distribution::Exact, 1.5, 0.3), n, 99);
        assert!(exact.iter().all(|&v| v == 1.5));
    }

    #[test]
    fn test_exact_mode_uses_mean() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(1);
        let d = float_descriptor(Distribution::Normal, 75.0, 0.1);
        let r = d.realize(SamplingMode::Exact, &mut rng).unwrap();
        assert_eq!(r.value(), PropertyValue::Float(75.0));
    }

    #[test]
    fn test_invalid_descriptors_are_rejected() {
        let beta = PropertyDescriptor::new(
            "qe",
            "",
            PropertyType::Float,
            Distribution::Beta,
            PropertyValue::Float(1.2),
            0.01,
        );
        assert!(matches!(beta, Err(PropertyError::BetaMeanOutOfRange { .. })));

        let mismatch = PropertyDescriptor::new(
            "n",
            "",
            PropertyType::Int,
            Distribution::Exact,
            PropertyValue::Float(3.0),
            0.0,
        );
        assert!(matches!(mismatch, Err(PropertyError::TypeMismatch { .. })));

        assert_eq!(
            "lognormal".parse::<Distribution>(),
            Err(PropertyError::UnknownDistribution("lognormal".to_string()))
        );
        assert!("double".parse::<PropertyType>().is_err());
        assert_eq!("norm".parse::<Distribution>(), Ok(Distribution::Normal));
    }

    #[test]
    fn test_duplicate_name_is_fatal() {
        let mut catalog = PropertyCatalog::new(DeviceKind::Sensor);
        catalog.add_float("width", "", Distribution::Exact, 1.0, 0.0).unwrap();
        assert_eq!(
            catalog.add_float("width", "", Distribution::Exact, 2.0, 0.0),
            Err(PropertyError::DuplicateName("width".to_string()))
        );
    }

    #[test]
    fn test_set_value_validates_type() {
        let mut r = RealizedProperty::new("flag", PropertyValue::Bool(false));
        assert!(r.set_value(PropertyValue::Bool(true)).is_ok());
        assert!(r.set_value(PropertyValue::Float(1.0)).is_err());
        assert_eq!(r.value(), PropertyValue::Bool(true));
    }

    #[test]
    fn test_offset_fans_out_to_dependents() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(5);
        let mut catalog = PropertyCatalog::new(DeviceKind::Sensor);
        catalog.add_float("td", "", Distribution::Normal, 1.0, 0.05).unwrap();
        let a = catalog.realize_all(SamplingMode::Sampled, &mut rng).unwrap();
        let b = catalog.realize_all(SamplingMode::Sampled, &mut rng).unwrap();
        let a0 = a.get("td").unwrap().as_f64();
        let b0 = b.get("td").unwrap().as_f64();

        assert_eq!(catalog.set_offset("td", 0.25).unwrap(), 2);
        assert!((a.get("td").unwrap().as_f64() - a0 - 0.25).abs() < 1e-12);
        assert!((b.get("td").unwrap().as_f64() - b0 - 0.25).abs() < 1e-12);

        // 2回目は差分のみ反映
        catalog.set_offset("td", 0.1).unwrap();
        assert!((a.get("td").unwrap().as_f64() - a0 - 0.1).abs() < 1e-12);

        drop(b);
        assert_eq!(catalog.descriptor("td").unwrap().dependent_count(), 1);
    }

    #[test]
    fn test_fixed_count_requires_exact_int() {
        let mut catalog = PropertyCatalog::new(DeviceKind::Detector);
        catalog
            .add_property(
                "n_module",
                "",
                PropertyType::Int,
                Distribution::Normal,
                PropertyValue::Int(7),
                1.0,
            )
            .unwrap();
        assert!(matches!(
            catalog.fixed_count("n_module"),
            Err(PropertyError::NotFixedCount { .. })
        ));
    }
}
