// src/app.rs
//! Windowed runner: winit 0.30 event loop driving a [`WgpuDevice`].
//!
//! Implement [`Application`] to populate the scene and react to frames, then
//! hand it to [`run`]. The runner owns the device, assets, scene and
//! renderer; WASD/Space/Shift fly the camera, holding the right mouse button
//! looks around, Escape quits.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use glam::UVec2;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{DeviceEvent, DeviceId, ElementState, KeyEvent, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::asset::Assets;
use crate::camera::CameraController;
use crate::config::RendererSettings;
use crate::error::{Error, Result};
use crate::gpu::wgpu_backend::WgpuDevice;
use crate::renderer::Renderer;
use crate::scene::Scene;

/// What an application gets to touch during setup and each frame.
pub struct AppContext<'a> {
    pub device: &'a mut WgpuDevice,
    pub assets: &'a Assets,
    pub scene: &'a mut Scene,
    pub settings: &'a RendererSettings,
}

pub trait Application {
    /// Called once the window and device exist.
    fn setup(&mut self, ctx: &mut AppContext<'_>) -> Result<()>;

    /// Called every frame before the scene is advanced and drawn.
    fn update(&mut self, _ctx: &mut AppContext<'_>, _dt: f32) -> Result<()> {
        Ok(())
    }

    /// Raw window events, after the runner's own handling.
    fn window_event(&mut self, _event: &WindowEvent) {}
}

struct Running {
    window: Arc<Window>,
    device: WgpuDevice,
    assets: Assets,
    scene: Scene,
    renderer: Renderer,
    controller: CameraController,
    pressed: HashSet<KeyCode>,
    mouse_look: bool,
    last_frame: Instant,
}

impl Running {
    fn axis(&self, positive: KeyCode, negative: KeyCode) -> f32 {
        self.pressed.contains(&positive) as i32 as f32 - self.pressed.contains(&negative) as i32 as f32
    }
}

struct App<A: Application> {
    application: A,
    settings: RendererSettings,
    state: Option<Running>,
    error: Option<Error>,
}

impl<A: Application> App<A> {
    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<Running> {
        let window_settings = &self.settings.window;
        let attributes = Window::default_attributes()
            .with_title(window_settings.title.clone())
            .with_inner_size(PhysicalSize::new(window_settings.width, window_settings.height));
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .map_err(|e| Error::Device(format!("creating window: {e}")))?,
        );

        let mut device = pollster::block_on(WgpuDevice::new(window.clone(), window_settings.vsync))?;
        let assets = Assets::new(&self.settings);
        let mut scene = Scene::new(&mut device, self.settings.light_reserve);
        let size = crate::gpu::RenderDevice::framebuffer_size(&device);
        scene.camera.set_aspect(size.x as f32 / size.y.max(1) as f32);
        let renderer = Renderer::new(&mut device, self.settings.clone())?;

        let mut ctx = AppContext {
            device: &mut device,
            assets: &assets,
            scene: &mut scene,
            settings: &self.settings,
        };
        self.application.setup(&mut ctx)?;
        log::info!("Application ready ({} instances)", scene.len());

        Ok(Running {
            window,
            device,
            assets,
            scene,
            renderer,
            controller: CameraController::new(4.0, 0.003),
            pressed: HashSet::new(),
            mouse_look: false,
            last_frame: Instant::now(),
        })
    }

    fn frame(&mut self) -> Result<()> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        let now = Instant::now();
        let dt = now.duration_since(state.last_frame).as_secs_f32();
        state.last_frame = now;

        let forward = state.axis(KeyCode::KeyW, KeyCode::KeyS);
        let right = state.axis(KeyCode::KeyD, KeyCode::KeyA);
        let up = state.axis(KeyCode::Space, KeyCode::ShiftLeft);
        state.controller.process_keyboard(forward, right, up);
        state.controller.update_camera(&mut state.scene.camera, dt);

        let mut ctx = AppContext {
            device: &mut state.device,
            assets: &state.assets,
            scene: &mut state.scene,
            settings: &self.settings,
        };
        self.application.update(&mut ctx, dt)?;

        state.scene.update(dt);
        state
            .renderer
            .render(&mut state.device, &state.assets, &mut state.scene, dt)?;
        state.window.request_redraw();
        Ok(())
    }

    fn resize(&mut self, size: PhysicalSize<u32>) -> Result<()> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        let size = UVec2::new(size.width, size.height);
        if size.x == 0 || size.y == 0 {
            return Ok(());
        }
        state.device.resize(size);
        state
            .renderer
            .on_framebuffer_change(&mut state.device, &mut state.scene, size)
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: Error) {
        log::error!("{error}");
        self.error = Some(error);
        event_loop.exit();
    }
}

impl<A: Application> ApplicationHandler for App<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        match self.start(event_loop) {
            Ok(state) => {
                state.window.request_redraw();
                self.state = Some(state);
            }
            Err(error) => self.fail(event_loop, error),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(state) = self.state.as_mut() else { return };
        if state.window.id() != window_id {
            return;
        }

        match &event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Err(error) = self.resize(*size) {
                    self.fail(event_loop, error);
                    return;
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: key_state,
                        ..
                    },
                ..
            } => match (code, key_state) {
                (KeyCode::Escape, ElementState::Pressed) => event_loop.exit(),
                (code, ElementState::Pressed) => {
                    state.pressed.insert(*code);
                }
                (code, ElementState::Released) => {
                    state.pressed.remove(code);
                }
            },
            WindowEvent::MouseInput {
                state: button_state,
                button: MouseButton::Right,
                ..
            } => state.mouse_look = *button_state == ElementState::Pressed,
            WindowEvent::RedrawRequested => {
                if let Err(error) = self.frame() {
                    self.fail(event_loop, error);
                    return;
                }
            }
            _ => {}
        }
        self.application.window_event(&event);
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        let Some(state) = self.state.as_mut() else { return };
        if let DeviceEvent::MouseMotion { delta: (dx, dy) } = event {
            if state.mouse_look {
                state.controller.process_mouse(dx as f32, -dy as f32);
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.renderer.release(&mut state.device);
            state.scene.lighting.release(&mut state.device);
            state.assets.clear(&mut state.device);
            log::info!("Shut down after {} frames", state.renderer.frame_index());
        }
    }
}

/// Open a window and run `application` until it is closed.
pub fn run<A: Application>(application: A, settings: RendererSettings) -> Result<()> {
    let event_loop = EventLoop::new().map_err(|e| Error::Device(format!("creating event loop: {e}")))?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = App {
        application,
        settings,
        state: None,
        error: None,
    };
    event_loop
        .run_app(&mut app)
        .map_err(|e| Error::Device(format!("event loop: {e}")))?;
    match app.error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
