use rand::Rng;

use crate::models::{
    common::Orientation,
    property::{Distribution, PropertyCatalog, PropertyError, PropertyType, PropertyValue, SharedCatalog},
    sensor::Sensor,
    traits::{DeviceCore, DeviceKind, IDevice, SamplingMode, ValueKind},
};

/// 光センサーモジュール
///
/// 一列に並んだ光センサーのグループです。各センサーの配置（モジュール座標系での
/// 中心位置と角度）はモジュールのプロパティとして保持します。
/// センサー数は exact 分布の int 型プロパティ `n_sensor` で構築時に固定されます。
#[derive(Debug)]
pub struct SensorModule {
    core: DeviceCore,
    sensors: Vec<Sensor>,
}

impl SensorModule {
    /// 新しいモジュールを作成し、その中のセンサーを全て構築します
    pub fn new<R: Rng + ?Sized>(
        id: usize,
        catalog: &SharedCatalog,
        sensor_catalog: &SharedCatalog,
        mode: SamplingMode,
        rng: &mut R,
    ) -> Result<Self, PropertyError> {
        let n_sensor = catalog.borrow().fixed_count("n_sensor")?;
        let core = DeviceCore::build(id, catalog, mode, rng)?;
        let sensors = (0..n_sensor)
            .map(|i| Sensor::new(i, sensor_catalog, mode, rng))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { core, sensors })
    }

    /// モジュールのデフォルト設計プロパティ
    ///
    /// センサーはモジュールのx軸に沿って `pitch` 間隔で中央揃えに並びます。
    pub fn default_catalog(n_sensor: usize, pitch: f64) -> Result<PropertyCatalog, PropertyError> {
        use Distribution::*;
        let mut c = PropertyCatalog::new(DeviceKind::Module);

        c.add_property(
            "n_sensor",
            "number of photosensors in module",
            PropertyType::Int,
            Exact,
            PropertyValue::Int(n_sensor as i64),
            0.0,
        )?;
        c.add_float("pitch", "separation between centres of photosensors (mm)", Exact, pitch, 0.0)?;
        c.add_float(
            "width",
            "width of module in the active surface plane (mm)",
            Normal,
            n_sensor as f64 * pitch,
            1.0,
        )?;

        let mut x = -((n_sensor as f64) - 1.0) / 2.0 * pitch;
        for i in 0..n_sensor {
            c.add_float(
                &format!("x_{}", i),
                "x coordinate of center of photosensor active surface wrt module center (mm)",
                Normal,
                x,
                0.5,
            )?;
            c.add_float(
                &format!("y_{}", i),
                "y coordinate of center of photosensor active surface wrt module center (mm)",
                Normal,
                0.0,
                0.5,
            )?;
            c.add_float(
                &format!("angle_{}", i),
                "effective angle wrt module coordinate system (rad)",
                Normal,
                0.0,
                0.001,
            )?;
            x += pitch;
        }

        Ok(c)
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn sensor(&self, i: usize) -> Option<&Sensor> {
        self.sensors.get(i)
    }

    pub fn n_sensor(&self) -> usize {
        self.sensors.len()
    }

    /// 有効面の幅
    pub fn width(&self, kind: ValueKind) -> Result<f64, PropertyError> {
        self.get_f64("width", kind)
    }

    /// i番目のセンサーのモジュール座標系での姿勢
    pub fn sensor_placement(&self, i: usize, kind: ValueKind) -> Result<Orientation, PropertyError> {
        Ok(Orientation::new(
            self.get_f64(&format!("x_{}", i), kind)?,
            self.get_f64(&format!("y_{}", i), kind)?,
            self.get_f64(&format!("angle_{}", i), kind)?,
        ))
    }
}

impl IDevice for SensorModule {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DeviceCore {
        &mut self.core
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Module
    }
}
