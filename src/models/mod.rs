// 基本的なデータ型と幾何ユーティリティ
pub mod common;

// デバイスの基本インターフェース（trait）定義
pub mod traits;

// 設計プロパティと実現値
pub mod property;

// 各デバイスモデルの実装
pub mod sensor;
pub mod sensor_module;
pub mod detector;
pub mod emitter;
pub mod photon;
pub mod event;

// 便利な re-export
pub use common::*;
pub use traits::*;
pub use property::{
    Distribution, PropertyCatalog, PropertyDescriptor, PropertyError, PropertyRow, PropertyType,
    PropertyValue, RealizedProperty, SharedCatalog,
};
pub use sensor::{Sensor, SensorResponse};
pub use sensor_module::SensorModule;
pub use detector::{Detector, DetectorLayout, ModuleLayout, SensorLayout};
pub use emitter::{Emission, Emitter, EmitterOptics, TrackParameters, MAX_PHOTONS};
pub use photon::{Photon, PHOTON_VELOCITY};
pub use event::{Event, SensorRecord};
