// src/main.rs
#![cfg(not(target_arch = "wasm32"))]

use std::backtrace::Backtrace;
use std::fs::File;
use std::io::Write;
use std::panic;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use glam::{Mat4, Vec3, Vec4};
use log::{error, info};

use lumen_engine::app::{self, AppContext, Application};
use lumen_engine::config::RendererSettings;
use lumen_engine::fx::modules::{Acceleration, ColorByLife, InitialVelocity, Lifetime, Movement};
use lumen_engine::fx::{Distribution, EffectBuilder, EffectInstance, SpawnMode, SpawnSettings};
use lumen_engine::gltf_loader::{GltfModelLoader, ModelLoaderFlags};
use lumen_engine::instances::Instance;
use lumen_engine::lighting::{DirectionalLight, LightId, PointLight};
use lumen_engine::materials::{Blending, MaterialBuilder, Property};
use lumen_engine::model::{AbstractModel, Model};
use lumen_engine::shader::ModelShader;
use lumen_engine::Result;

const SETTINGS_FILE: &str = "lumen.json";

/// Demo scene: a floor, a field of instanced crates, a glass pane, an
/// orbiting light and a spark fountain. An optional glTF path on the command
/// line is loaded into the middle of the scene.
struct Showcase {
    model_path: Option<String>,
    orbit_light: Option<LightId>,
    time: f32,
}

impl Showcase {
    fn solid(ctx: &mut AppContext<'_>, name: &str, color: Vec4, blending: Blending) -> Result<Arc<AbstractModel>> {
        let cube = ctx.assets.cube(ctx.device)?;
        let material = MaterialBuilder::new(ctx.assets)
            .name(format!("{name}_material"))
            .add(Property::Color, color)
            .add(Property::Roughness, 0.6f32)
            .model_shaders([ModelShader::Plain, ModelShader::Instanced])
            .blending(blending)
            .build(ctx.device)?;
        let model = Arc::new(AbstractModel::Plain(Model::new(name, vec![cube], vec![material])));
        ctx.assets.models.add(name, model)
    }

    fn spark_fountain(ctx: &mut AppContext<'_>) -> Result<Arc<EffectInstance>> {
        let spark = MaterialBuilder::new(ctx.assets)
            .name("spark")
            .add(Property::Color, Vec4::new(1.0, 0.7, 0.3, 1.0))
            .model_shaders([ModelShader::Effect])
            .blending(Blending::Additive)
            .build(ctx.device)?;
        EffectBuilder::new(ctx.assets)
            .name("fountain")
            .sprite_emitter("sparks", spark)
            .spawn(SpawnSettings {
                mode: SpawnMode::Spray { rate: 80.0 },
                max_count: 400,
                duration: None,
            })
            .module(InitialVelocity(Distribution::range(
                Vec3::new(-1.0, 4.0, -1.0),
                Vec3::new(1.0, 6.0, 1.0),
            )))
            .module(Lifetime(Distribution::range(1.0, 2.0)))
            .module(Acceleration(Distribution::Const(Vec3::new(0.0, -9.8, 0.0))))
            .module(Movement)
            .module(ColorByLife(Distribution::curve(vec![
                (0.0, Vec4::new(1.0, 0.9, 0.5, 1.0)),
                (1.0, Vec4::new(1.0, 0.2, 0.0, 0.0)),
            ])))
            .build()
    }
}

impl Application for Showcase {
    fn setup(&mut self, ctx: &mut AppContext<'_>) -> Result<()> {
        let floor = Self::solid(ctx, "floor", Vec4::new(0.4, 0.4, 0.45, 1.0), Blending::Opaque)?;
        ctx.scene.add(
            Instance::model(floor)
                .with_position(Vec3::new(0.0, -0.5, 0.0))
                .with_scale(Vec3::new(20.0, 0.1, 20.0)),
        );

        let crate_model = Self::solid(ctx, "crate", Vec4::new(0.8, 0.5, 0.25, 1.0), Blending::Opaque)?;
        let transforms = (0..5)
            .flat_map(|x| (0..5).map(move |z| (x, z)))
            .map(|(x, z)| Mat4::from_translation(Vec3::new(x as f32 * 2.5 - 5.0, 0.0, z as f32 * 2.5 - 12.0)))
            .collect();
        ctx.scene.add(Instance::instanced(crate_model, transforms));

        let glass = Self::solid(ctx, "glass", Vec4::new(0.3, 0.6, 1.0, 0.35), Blending::Translucent)?;
        ctx.scene.add(
            Instance::model(glass)
                .with_position(Vec3::new(3.0, 1.0, 2.0))
                .with_scale(Vec3::new(2.0, 2.0, 0.05)),
        );

        let fountain = Self::spark_fountain(ctx)?;
        ctx.scene.add(Instance::effect(EffectInstance::instantiate(&fountain, Vec3::new(-3.0, 0.0, 0.0))));

        if let Some(path) = &self.model_path {
            let model = GltfModelLoader::load(ctx.device, ctx.assets, path, &ModelLoaderFlags::default())?;
            ctx.scene.add(Instance::model(model));
        }

        let lighting = &mut ctx.scene.lighting;
        lighting
            .directional_lights
            .add(DirectionalLight::new(Vec3::new(-0.4, -1.0, -0.3), Vec3::ONE, 0.8));
        self.orbit_light = Some(
            lighting
                .point_lights
                .add(PointLight::new(Vec3::new(0.0, 2.0, 0.0), Vec3::new(1.0, 0.6, 0.3), 4.0, 10.0)),
        );

        ctx.scene.camera.set_position(Vec3::new(0.0, 4.0, 10.0));
        ctx.scene.camera.look_at(Vec3::ZERO);
        Ok(())
    }

    fn update(&mut self, ctx: &mut AppContext<'_>, dt: f32) -> Result<()> {
        self.time += dt;
        if let Some(light) = self.orbit_light.and_then(|id| ctx.scene.lighting.point_lights.get_mut(id)) {
            light.set_position(Vec3::new(self.time.cos() * 4.0, 2.0, self.time.sin() * 4.0));
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    lumen_engine::init_logging();
    install_panic_hook();

    let settings = if Path::new(SETTINGS_FILE).exists() {
        match RendererSettings::load(SETTINGS_FILE) {
            Ok(settings) => settings,
            Err(e) => {
                error!("{SETTINGS_FILE}: {e}; using defaults");
                RendererSettings::default()
            }
        }
    } else {
        RendererSettings::default()
    };
    info!("Starting Lumen ({:?} pipeline)", settings.pipeline);

    let model_path = std::env::args().nth(1);
    let showcase = Showcase {
        model_path: model_path.clone(),
        orbit_light: None,
        time: 0.0,
    };
    app::run(showcase, settings).with_context(|| match model_path {
        Some(path) => format!("running showcase with {path}"),
        None => "running showcase".to_string(),
    })
}

/// Print panics with a backtrace and keep a copy in `lumen_crash.log`.
fn install_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        let backtrace = Backtrace::force_capture();
        let msg = match panic_info.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<dyn Any>",
            },
        };
        let location = panic_info
            .location()
            .map_or("unknown location".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));
        let crash = format!("=== LUMEN CRASH ===\nReason: {msg}\nLocation: {location}\n\nStack Trace:\n{backtrace}");

        eprintln!("\x1b[31;1m{crash}\x1b[0m");
        if let Ok(mut file) = File::create("lumen_crash.log") {
            let _ = file.write_all(crash.as_bytes());
            eprintln!("Crash report saved to lumen_crash.log");
        }
    }));
}
