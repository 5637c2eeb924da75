use std::f64::consts::FRAC_PI_2;

use rand::Rng;
use tracing::debug;

use crate::models::{
    common::{global_orientation, Orientation, Point2D},
    property::{Distribution, PropertyCatalog, PropertyError, PropertyType, PropertyValue, SharedCatalog},
    sensor::SensorResponse,
    sensor_module::SensorModule,
    traits::{DeviceCore, DeviceKind, IDevice, SamplingMode, ValueKind},
};

/// 検出器
///
/// 光センサーモジュールのグループです。各モジュールの配置（検出器座標系での
/// 中心位置と角度）と読み出し時間窓を検出器のプロパティとして保持します。
/// 検出器座標系はグローバル座標系と一致します。
#[derive(Debug)]
pub struct Detector {
    core: DeviceCore,
    modules: Vec<SensorModule>,
    module_catalog: SharedCatalog,
    sensor_catalog: SharedCatalog,
}

/// 1回の評価で使う検出器全体の解決済み配置
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorLayout {
    pub modules: Vec<ModuleLayout>,
    /// 読み出し時間窓（ns）
    pub readout_window: f64,
}

/// モジュールの解決済み配置
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleLayout {
    /// グローバル座標系での姿勢
    pub orientation: Orientation,
    pub width: f64,
    pub sensors: Vec<SensorLayout>,
}

/// センサーの解決済み配置と応答
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorLayout {
    /// グローバル座標系での姿勢
    pub orientation: Orientation,
    pub response: SensorResponse,
}

impl SensorLayout {
    /// 有効面の両端点（面の方向に沿って -h, +h）
    pub fn edges(&self) -> [Point2D; 2] {
        let center = self.orientation.position();
        let along = self.orientation.direction() * self.response.half_width();
        [center - along, center + along]
    }
}

impl DetectorLayout {
    /// (モジュール番号, センサー番号, 配置) の列挙
    pub fn iter_sensors(&self) -> impl Iterator<Item = (usize, usize, &SensorLayout)> {
        self.modules.iter().enumerate().flat_map(|(i_module, module)| {
            module
                .sensors
                .iter()
                .enumerate()
                .map(move |(i_sensor, sensor)| (i_module, i_sensor, sensor))
        })
    }

    /// モジュールごとのセンサー数
    pub fn shape(&self) -> Vec<usize> {
        self.modules.iter().map(|m| m.sensors.len()).collect()
    }
}

impl Detector {
    /// 新しい検出器を作成し、モジュールとセンサーを再帰的に構築します
    ///
    /// 全ての実現値はこの時点で確定し、以降モジュールやセンサーの追加・削除はできません。
    /// 個数と配置プロパティが食い違うカタログ（例えば `n_sensor` に対して `x_i` が足りない）は
    /// ここでエラーになります。
    pub fn new<R: Rng + ?Sized>(
        id: usize,
        catalog: &SharedCatalog,
        module_catalog: &SharedCatalog,
        sensor_catalog: &SharedCatalog,
        mode: SamplingMode,
        rng: &mut R,
    ) -> Result<Self, PropertyError> {
        let n_module = catalog.borrow().fixed_count("n_module")?;
        let core = DeviceCore::build(id, catalog, mode, rng)?;
        let modules = (0..n_module)
            .map(|i| SensorModule::new(i, module_catalog, sensor_catalog, mode, rng))
            .collect::<Result<Vec<_>, _>>()?;

        let detector = Self {
            core,
            modules,
            module_catalog: SharedCatalog::clone(module_catalog),
            sensor_catalog: SharedCatalog::clone(sensor_catalog),
        };
        detector.layout(ValueKind::Design)?;
        detector.layout(ValueKind::Realized)?;

        debug!(
            detector_id = id,
            n_module = detector.modules.len(),
            n_sensor = detector.modules.iter().map(|m| m.n_sensor()).sum::<usize>(),
            mode = ?mode,
            "DETECTOR_BUILT: 検出器を構築しました"
        );
        Ok(detector)
    }

    /// 検出器のデフォルト設計プロパティ
    ///
    /// モジュールは y 軸に沿って `pitch` 間隔で中央揃えに並び、面は鉛直（π/2）です。
    pub fn default_catalog(n_module: usize, pitch: f64) -> Result<PropertyCatalog, PropertyError> {
        use Distribution::*;
        let mut c = PropertyCatalog::new(DeviceKind::Detector);

        c.add_property(
            "n_module",
            "number of photosensor modules in detector",
            PropertyType::Int,
            Exact,
            PropertyValue::Int(n_module as i64),
            0.0,
        )?;
        c.add_float("pitch", "separation between centres of photosensor modules (mm)", Exact, pitch, 0.0)?;
        c.add_float("readout_window", "readout time window (ns)", Exact, 100.0, 0.0)?;

        let mut y = -((n_module as f64) - 1.0) / 2.0 * pitch;
        for i in 0..n_module {
            c.add_float(
                &format!("x_{}", i),
                "x coordinate of center of module front surface wrt detector center (mm)",
                Normal,
                0.0,
                2.0,
            )?;
            c.add_float(
                &format!("y_{}", i),
                "y coordinate of center of module front surface wrt detector center (mm)",
                Normal,
                y,
                2.0,
            )?;
            c.add_float(
                &format!("angle_{}", i),
                "effective angle wrt horizontal in detector coordinate system (rad)",
                Normal,
                FRAC_PI_2,
                0.002,
            )?;
            y += pitch;
        }

        Ok(c)
    }

    pub fn modules(&self) -> &[SensorModule] {
        &self.modules
    }

    pub fn module(&self, i: usize) -> Option<&SensorModule> {
        self.modules.get(i)
    }

    pub fn n_module(&self) -> usize {
        self.modules.len()
    }

    /// 種別ごとの共有カタログ（検出器、モジュール、センサー）
    pub fn catalog(&self, kind: DeviceKind) -> Option<&SharedCatalog> {
        match kind {
            DeviceKind::Detector => Some(self.core.catalog()),
            DeviceKind::Module => Some(&self.module_catalog),
            DeviceKind::Sensor => Some(&self.sensor_catalog),
            DeviceKind::Emitter => None,
        }
    }

    /// i番目のモジュールの検出器座標系での姿勢
    pub fn module_placement(&self, i: usize, kind: ValueKind) -> Result<Orientation, PropertyError> {
        Ok(Orientation::new(
            self.get_f64(&format!("x_{}", i), kind)?,
            self.get_f64(&format!("y_{}", i), kind)?,
            self.get_f64(&format!("angle_{}", i), kind)?,
        ))
    }

    pub fn readout_window(&self, kind: ValueKind) -> Result<f64, PropertyError> {
        self.get_f64("readout_window", kind)
    }

    /// 全モジュール・全センサーのグローバル配置と応答を解決
    pub fn layout(&self, kind: ValueKind) -> Result<DetectorLayout, PropertyError> {
        let mut modules = Vec::with_capacity(self.modules.len());
        for (i_module, module) in self.modules.iter().enumerate() {
            let frame = self.module_placement(i_module, kind)?;
            let mut sensors = Vec::with_capacity(module.n_sensor());
            for (i_sensor, sensor) in module.sensors().iter().enumerate() {
                let local = module.sensor_placement(i_sensor, kind)?;
                sensors.push(SensorLayout {
                    orientation: global_orientation(local, frame),
                    response: sensor.response(kind)?,
                });
            }
            modules.push(ModuleLayout {
                orientation: frame,
                width: module.width(kind)?,
                sensors,
            });
        }
        Ok(DetectorLayout {
            modules,
            readout_window: self.readout_window(kind)?,
        })
    }
}

impl IDevice for Detector {
    fn core(&self) -> &DeviceCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DeviceCore {
        &mut self.core
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Detector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::property::PropertyDescriptor;
    use crate::models::sensor::Sensor;
    use float_eq::assert_float_eq;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;

    fn build(mode: SamplingMode) -> Detector {
        let mut rng = Xoshiro256StarStar::seed_from_u64(21);
        Detector::new(
            0,
            &Detector::default_catalog(7, 700.0).unwrap().into_shared(),
            &SensorModule::default_catalog(5, 115.0).unwrap().into_shared(),
            &Sensor::default_catalog().unwrap().into_shared(),
            mode,
            &mut rng,
        )
        .unwrap()
    }

    #[test]
    fn test_hierarchy_shape() {
        let detector = build(SamplingMode::Sampled);
        assert_eq!(detector.n_module(), 7);
        let layout = detector.layout(ValueKind::Realized).unwrap();
        assert_eq!(layout.shape(), vec![5; 7]);
        assert_eq!(layout.iter_sensors().count(), 35);
    }

    #[test]
    fn test_design_layout_places_sensors_on_vertical_modules() {
        let detector = build(SamplingMode::Sampled);
        let layout = detector.layout(ValueKind::Design).unwrap();
        // 中央モジュールの最初のセンサー: モジュール x 軸が鉛直上向き
        let sensor = &layout.modules[3].sensors[0];
        assert_float_eq!(sensor.orientation.x, 0.0, abs <= 1e-9);
        assert_float_eq!(sensor.orientation.y, -230.0, abs <= 1e-9);
        assert_float_eq!(sensor.orientation.angle, FRAC_PI_2, abs <= 1e-12);
        let [e0, e1] = sensor.edges();
        assert_float_eq!(e0.y, -230.0 - 37.5, abs <= 1e-9);
        assert_float_eq!(e1.y, -230.0 + 37.5, abs <= 1e-9);
    }

    #[test]
    fn test_exact_mode_realized_equals_design() {
        let detector = build(SamplingMode::Exact);
        assert_eq!(
            detector.layout(ValueKind::Design).unwrap(),
            detector.layout(ValueKind::Realized).unwrap()
        );
    }

    #[test]
    fn test_module_offset_moves_every_module() {
        let detector = build(SamplingMode::Sampled);
        let before = detector.layout(ValueKind::Realized).unwrap();
        let catalog = detector.catalog(DeviceKind::Module).unwrap();
        catalog.borrow_mut().set_offset("y_0", 1.5).unwrap();
        let after = detector.layout(ValueKind::Realized).unwrap();
        for (b, a) in before.modules.iter().zip(&after.modules) {
            // モジュール座標系の y はグローバルでは -x 方向（回転 π/2）
            let shift = a.sensors[0].orientation.position().distance(&b.sensors[0].orientation.position());
            assert_float_eq!(shift, 1.5, abs <= 1e-9);
        }
    }

    #[test]
    fn test_count_without_placements_fails_construction() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(22);
        let mut module_catalog = SensorModule::default_catalog(5, 115.0).unwrap();
        module_catalog.replace(
            PropertyDescriptor::new(
                "n_sensor",
                "number of photosensors",
                PropertyType::Int,
                Distribution::Exact,
                PropertyValue::Int(6),
                0.0,
            )
            .unwrap(),
        );
        let result = Detector::new(
            0,
            &Detector::default_catalog(7, 700.0).unwrap().into_shared(),
            &module_catalog.into_shared(),
            &Sensor::default_catalog().unwrap().into_shared(),
            SamplingMode::Sampled,
            &mut rng,
        );
        match result {
            Err(PropertyError::UnknownProperty(name)) => assert_eq!(name, "x_5"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }
}
