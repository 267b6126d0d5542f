use std::{mem, process, sync::Arc};

use anyhow::{bail, Context as _};
use bytemuck::NoUninit;
use image::RgbaImage;
use wgpu::{
    Adapter, Backends, BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout,
    BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingResource, BindingType, BlendState,
    Buffer, BufferBindingType, BufferDescriptor, BufferUsages, Color, ColorTargetState,
    ColorWrites, CommandEncoder, Device, DeviceDescriptor, Extent3d, FilterMode, FragmentState,
    InstanceDescriptor, LoadOp, MemoryHints, MultisampleState, Operations, Origin3d,
    PipelineCompilationOptions, PipelineLayoutDescriptor, PrimitiveState, PrimitiveTopology,
    Queue, RenderPass, RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline,
    RenderPipelineDescriptor, RequestAdapterOptions, Sampler, SamplerBindingType,
    SamplerDescriptor, ShaderModuleDescriptor, ShaderSource, ShaderStages, StoreOp, Surface,
    SurfaceError, SurfaceTarget, TexelCopyBufferLayout, TexelCopyTextureInfo, Texture,
    TextureAspect, TextureDescriptor, TextureDimension, TextureFormat, TextureSampleType,
    TextureUsages, TextureViewDimension, VertexState,
};
use winit::{
    application::ApplicationHandler,
    dpi::{LogicalSize, PhysicalPosition},
    event::{ElementState, KeyEvent, Touch, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoopProxy},
    keyboard::{Key as WinitKey, NamedKey},
    window::{Window, WindowId},
};

use crate::{
    actions::{self, Job},
    board::{Board, PromptEdit},
    cmd::Cmd,
    config::{Config, Key},
    input::{InputEvent, MouseButton, Point, Target},
    math::{vec2, Rect, Vec2f},
    pointer::Pointer,
    service::DiagramService,
};

/// Space between the window border and the panels, and between the two panels.
const MARGIN: f32 = 16.0;
const CLEAR_COLOR: Color = Color {
    r: 0.02,
    g: 0.02,
    b: 0.025,
    a: 1.0,
};

pub struct App {
    instance: wgpu::Instance,
    config: Config,
    board: Board,
    service: Arc<dyn DiagramService>,
    proxy: EventLoopProxy<Cmd>,
    win: Option<Win>,

    pointer: Pointer,
    result_rect: Option<Rect>,
    title: String,
}

struct Gpu {
    adapter: Adapter,
    device: Device,
    queue: Queue,
    /// Format of the window surface.
    format: TextureFormat,

    render_pipeline: RenderPipeline,
    panel_bgl: BindGroupLayout,
    sampler: Sampler,
}

impl Gpu {
    fn new(instance: &wgpu::Instance, surface: &Surface<'_>) -> anyhow::Result<Self> {
        let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
            compatible_surface: Some(surface),
            ..Default::default()
        }))
        .context("failed to find a supported graphics adapter")?;

        let surface_caps = surface.get_capabilities(&adapter);
        let srgb = surface_caps.formats.iter().copied().find(TextureFormat::is_srgb);
        let Some(format) = srgb.or(surface_caps.formats.first().copied()) else {
            bail!("surface is not supported by adapter {:?}", adapter.get_info().name);
        };

        let (device, queue) = pollster::block_on(adapter.request_device(&DeviceDescriptor {
            memory_hints: MemoryHints::MemoryUsage,
            ..Default::default()
        }))?;

        let shader = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("shader"),
            source: ShaderSource::Wgsl(include_str!("shader.wgsl").into()),
        });

        let panel_bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("panel"),
            entries: &[
                BindGroupLayoutEntry {
                    binding: 0,
                    count: None,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Sampler(SamplerBindingType::Filtering),
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    count: None,
                    visibility: ShaderStages::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                        view_dimension: TextureViewDimension::D2,
                        multisampled: false,
                    },
                },
                BindGroupLayoutEntry {
                    binding: 2,
                    count: None,
                    visibility: ShaderStages::VERTEX_FRAGMENT,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                },
            ],
        });

        let render_pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("panel_render_pipeline"),
            layout: Some(&device.create_pipeline_layout(&PipelineLayoutDescriptor {
                label: Some("panel_render_pipeline"),
                bind_group_layouts: &[&panel_bgl],
                ..Default::default()
            })),
            vertex: VertexState {
                module: &shader,
                entry_point: Some("vertex"),
                compilation_options: PipelineCompilationOptions::default(),
                buffers: &[],
            },
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: MultisampleState::default(),
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: Some("fragment"),
                compilation_options: PipelineCompilationOptions::default(),
                targets: &[Some(ColorTargetState {
                    format,
                    blend: Some(BlendState::REPLACE),
                    write_mask: ColorWrites::all(),
                })],
            }),
            multiview: None,
            cache: None,
        });
        let sampler = device.create_sampler(&SamplerDescriptor {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..Default::default()
        });

        Ok(Gpu {
            adapter,
            device,
            queue,
            format,
            render_pipeline,
            panel_bgl,
            sampler,
        })
    }
}

struct Win {
    window: Arc<Window>,
    surface: Surface<'static>,
    gpu: Gpu,

    canvas: Panel,
    result: Panel,
}

impl Win {
    fn recreate_swapchain(&self) -> anyhow::Result<()> {
        let res = self.window.inner_size();
        if res.width == 0 || res.height == 0 {
            // Minimized; a zero-sized surface can't be configured.
            return Ok(());
        }

        let mut config = self
            .surface
            .get_default_config(&self.gpu.adapter, res.width, res.height)
            .context("adapter does not support surface")?;
        config.format = self.gpu.format;

        log::debug!(
            "configuring window surface for {}x{} (format: {:?}, present mode: {:?})",
            res.width,
            res.height,
            config.format,
            config.present_mode,
        );

        self.surface.configure(&self.gpu.device, &config);
        Ok(())
    }

    fn redraw(
        &mut self,
        canvas: Rect,
        result: Option<Rect>,
        backdrop: [f32; 4],
    ) -> anyhow::Result<()> {
        let st = match self.surface.get_current_texture() {
            Ok(st) => st,
            Err(err @ (SurfaceError::Outdated | SurfaceError::Lost)) => {
                log::debug!("surface error: {}", err);
                self.recreate_swapchain()?;
                self.surface
                    .get_current_texture()
                    .context("failed to acquire next frame after recreating swapchain")?
            }
            Err(SurfaceError::Timeout) => {
                log::debug!("timed out acquiring frame");
                return Ok(());
            }
            Err(e) => bail!("failed to acquire frame: {e}"),
        };

        let mut enc = self.gpu.device.create_command_encoder(&Default::default());
        let mut pass = Pass::new(&self.gpu, &mut enc, &st.texture);
        self.canvas.draw(&mut pass, canvas, backdrop);
        if let Some(rect) = result {
            self.result.draw(&mut pass, rect, backdrop);
        }
        drop(pass);

        self.gpu.queue.submit([enc.finish()]);
        self.window.pre_present_notify();
        st.present();
        Ok(())
    }
}

impl App {
    pub fn new(
        config: Config,
        service: Arc<dyn DiagramService>,
        proxy: EventLoopProxy<Cmd>,
    ) -> anyhow::Result<Self> {
        let board = Board::new(&config);
        let title = board.status_line();
        Ok(Self {
            instance: wgpu::Instance::new(&InstanceDescriptor {
                backends: Backends::PRIMARY,
                ..Default::default()
            }),
            config,
            board,
            service,
            proxy,
            win: None,
            pointer: Pointer::default(),
            result_rect: None,
            title,
        })
    }

    fn create_win(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<Win> {
        let window = Arc::new(
            event_loop.create_window(
                Window::default_attributes()
                    .with_inner_size(LogicalSize::new(1400.0, 820.0))
                    .with_title(&self.title),
            )?,
        );

        let surface = self
            .instance
            .create_surface(SurfaceTarget::from(window.clone()))?;
        let gpu = Gpu::new(&self.instance, &surface)?;

        let raster = self.board.canvas().raster();
        let size = raster.size();
        log::debug!(
            "creating canvas at {}x{}, format={:?}",
            size.x(),
            size.y(),
            gpu.format
        );
        let mut canvas = Panel::new(&gpu, "canvas");
        canvas.upload(&gpu, raster.image());
        let mut result = Panel::new(&gpu, "result");
        result.upload(&gpu, &RgbaImage::new(1, 1));
        drop(raster);

        let win = Win {
            window,
            surface,
            gpu,
            canvas,
            result,
        };
        win.recreate_swapchain()?;
        Ok(win)
    }

    /// Recomputes where the panels are shown in the window.
    fn relayout(&mut self) {
        let Some(win) = &self.win else { return };
        let res = win.window.inner_size();
        let (canvas, result) = layout(
            vec2(res.width as f32, res.height as f32),
            self.board.canvas().raster().size().into(),
            self.board.result_visible(),
        );
        self.board.set_canvas_layout(canvas);
        self.result_rect = result;
    }

    fn redraw(&mut self) {
        let Some(win) = &mut self.win else { return };

        if self.board.canvas().take_dirty() {
            win.canvas
                .upload(&win.gpu, self.board.canvas().raster().image());
        }
        if self.board.take_result_dirty() {
            match self.board.result() {
                Some(image) => win.result.upload(&win.gpu, image),
                None => win.result.upload(&win.gpu, &RgbaImage::new(1, 1)),
            }
        }

        let backdrop = linear_rgba(self.config.canvas.backdrop.0);
        if let Err(e) = win.redraw(self.board.canvas().layout(), self.result_rect, backdrop) {
            log::error!("failed to draw frame: {e:#}");
        }
    }

    fn apply(&mut self, cmd: Cmd) {
        if let Some(job) = self.board.apply(cmd) {
            self.start(job);
        }
        self.after_update();
    }

    fn start(&self, job: Job) {
        let proxy = self.proxy.clone();
        actions::spawn(job, self.service.clone(), move |cmd| {
            drop(proxy.send_event(cmd))
        });
    }

    /// Shows pending notifications and refreshes everything derived from the board.
    fn after_update(&mut self) {
        for toast in self.board.take_toasts() {
            toast.present();
        }
        self.relayout();

        let Some(win) = &self.win else { return };
        let title = self.board.status_line();
        if title != self.title {
            win.window.set_title(&title);
            self.title = title;
        }
        win.window.request_redraw();
    }

    fn dispatch(&mut self, (target, event): (Target, InputEvent)) {
        if let Err(e) = self.board.dispatch(target, &event) {
            log::error!("failed to handle {:?}: {e:#}", event.kind());
        }
        self.after_update();
    }

    fn key_pressed(&mut self, event: KeyEvent) {
        if self.board.is_editing_prompt() {
            let edit = match &event.logical_key {
                WinitKey::Named(NamedKey::Enter) => Some(PromptEdit::Submit),
                WinitKey::Named(NamedKey::Escape) => Some(PromptEdit::Cancel),
                WinitKey::Named(NamedKey::Backspace) => Some(PromptEdit::Backspace),
                _ => event.text.as_ref().map(|text| PromptEdit::Insert(text.to_string())),
            };
            if let Some(edit) = edit {
                if let Some(job) = self.board.edit_prompt(edit) {
                    self.start(job);
                }
                self.after_update();
            }
            return;
        }

        let Some(key) = Key::from_winit(&event.logical_key) else {
            return;
        };
        match self.config.command_for(&key) {
            Some(cmd) => {
                log::debug!("{key} -> {cmd:?}");
                self.apply(cmd);
            }
            None => log::trace!("{key} is not bound"),
        }
    }
}

impl ApplicationHandler<Cmd> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.win.is_none() {
            let win = match self.create_win(event_loop) {
                Ok(win) => win,
                Err(e) => {
                    log::error!("could not create window: {e:#}");
                    process::exit(1);
                }
            };
            self.win = Some(win);
            self.relayout();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(win) = &self.win else { return };

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::RedrawRequested => self.redraw(),
            WindowEvent::Resized(_) => {
                if let Err(e) = win.recreate_swapchain() {
                    log::error!("failed to reconfigure surface: {e:#}");
                }
                win.window.request_redraw();
                self.relayout();
            }
            WindowEvent::CursorMoved { position, .. } => {
                let canvas = self.board.canvas().layout();
                let event = self.pointer.cursor_moved(canvas, physical(position));
                self.dispatch(event);
            }
            WindowEvent::CursorLeft { .. } => {
                let event = self.pointer.cursor_left();
                self.dispatch(event);
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let canvas = self.board.canvas().layout();
                if let Some(event) = self.pointer.button(canvas, state, mouse_button(button)) {
                    self.dispatch(event);
                }
            }
            WindowEvent::Touch(Touch {
                id,
                phase,
                location,
                ..
            }) => {
                let canvas = self.board.canvas().layout();
                if let Some(event) = self.pointer.touch(canvas, id, phase, physical(location)) {
                    self.dispatch(event);
                }
            }
            WindowEvent::KeyboardInput {
                event,
                is_synthetic: false,
                ..
            } if event.state == ElementState::Pressed => self.key_pressed(event),
            _ => {}
        }
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: Cmd) {
        self.apply(event);
    }
}

fn physical(position: PhysicalPosition<f64>) -> Point {
    vec2(position.x as f32, position.y as f32)
}

fn mouse_button(button: winit::event::MouseButton) -> MouseButton {
    use winit::event::MouseButton as B;
    match button {
        B::Left => MouseButton::Primary,
        B::Right => MouseButton::Secondary,
        B::Middle => MouseButton::Auxiliary,
        B::Back => MouseButton::Other(3),
        B::Forward => MouseButton::Other(4),
        B::Other(n) => MouseButton::Other(n),
    }
}

/// Places the canvas, and the result panel if it is shown, in a window of size `window`.
///
/// Both panels keep the aspect ratio of the canvas.
fn layout(window: Vec2f, canvas: Vec2f, show_result: bool) -> (Rect, Option<Rect>) {
    let area = Rect::new(vec2(0.0, 0.0), window).inset(MARGIN);
    if !show_result {
        return (area.fit(canvas), None);
    }
    let mut columns = area.columns(2, MARGIN).map(|col| col.fit(canvas));
    let left = columns.next().unwrap_or(Rect::ZERO);
    let right = columns.next().unwrap_or(Rect::ZERO);
    (left, Some(right))
}

/// Converts an sRGB color to the linear values the shader blends with.
fn linear_rgba([r, g, b, a]: [u8; 4]) -> [f32; 4] {
    let channel = |c: u8| {
        let c = c as f32 / 255.0;
        if c <= 0.04045 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    };
    [channel(r), channel(g), channel(b), a as f32 / 255.0]
}

#[derive(Clone, Copy, NoUninit)]
#[repr(C)]
struct Uniforms {
    /// Target rectangle in window pixels: origin, then size.
    rect: [f32; 4],
    render_target_size: [f32; 2],
    _padding: [f32; 2],
    backdrop: [f32; 4],
}

struct Pass<'a> {
    gpu: &'a Gpu,
    pass: RenderPass<'a>,
    render_target_size: Vec2f,
}

impl<'a> Pass<'a> {
    fn new(gpu: &'a Gpu, enc: &'a mut CommandEncoder, target: &Texture) -> Self {
        let pass = enc.begin_render_pass(&RenderPassDescriptor {
            color_attachments: &[Some(RenderPassColorAttachment {
                view: &target.create_view(&Default::default()),
                depth_slice: None,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(CLEAR_COLOR),
                    store: StoreOp::Store,
                },
            })],
            ..Default::default()
        });

        Self {
            gpu,
            pass,
            render_target_size: vec2(target.width() as f32, target.height() as f32),
        }
    }
}

/// A straight-alpha RGBA image shown in a rectangle of the window, over the backdrop color.
struct Panel {
    label: &'static str,
    texture: Texture,
    uniform_buf: Buffer,
    bind_group: BindGroup,
}

impl Panel {
    fn new(gpu: &Gpu, label: &'static str) -> Self {
        let texture = Self::create_texture(gpu, label, 1, 1);
        let uniform_buf = gpu.device.create_buffer(&BufferDescriptor {
            label: Some(label),
            size: mem::size_of::<Uniforms>() as u64,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = Self::create_bind_group(gpu, label, &texture, &uniform_buf);
        Self {
            label,
            texture,
            uniform_buf,
            bind_group,
        }
    }

    fn create_texture(gpu: &Gpu, label: &str, width: u32, height: u32) -> Texture {
        gpu.device.create_texture(&TextureDescriptor {
            label: Some(label),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8UnormSrgb,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        })
    }

    fn create_bind_group(
        gpu: &Gpu,
        label: &str,
        texture: &Texture,
        uniform_buf: &Buffer,
    ) -> BindGroup {
        gpu.device.create_bind_group(&BindGroupDescriptor {
            label: Some(label),
            layout: &gpu.panel_bgl,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::Sampler(&gpu.sampler),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(
                        &texture.create_view(&Default::default()),
                    ),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::Buffer(uniform_buf.as_entire_buffer_binding()),
                },
            ],
        })
    }

    /// Replaces the panel's contents, resizing the texture if needed.
    fn upload(&mut self, gpu: &Gpu, image: &RgbaImage) {
        let (width, height) = image.dimensions();
        if (self.texture.width(), self.texture.height()) != (width, height) {
            log::debug!("resizing {} texture to {width}x{height}", self.label);
            self.texture = Self::create_texture(gpu, self.label, width, height);
            self.bind_group =
                Self::create_bind_group(gpu, self.label, &self.texture, &self.uniform_buf);
        }
        gpu.queue.write_texture(
            TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            image.as_raw(),
            TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            self.texture.size(),
        );
    }

    fn draw(&self, p: &mut Pass<'_>, rect: Rect, backdrop: [f32; 4]) {
        let uniforms = Uniforms {
            rect: [rect.origin.x(), rect.origin.y(), rect.size.x(), rect.size.y()],
            render_target_size: p.render_target_size.into(),
            _padding: [0.0; 2],
            backdrop,
        };
        p.gpu
            .queue
            .write_buffer(&self.uniform_buf, 0, bytemuck::bytes_of(&uniforms));

        p.pass.set_pipeline(&p.gpu.render_pipeline);
        p.pass.set_bind_group(0, &self.bind_group, &[]);
        p.pass.draw(0..4, 0..1);
    }
}
