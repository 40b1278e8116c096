//! Image-based lighting precomputation.
//!
//! An environment is captured into a cubemap by rendering its source (an
//! equirectangular HDR image or the procedural sky) once per cube face, then
//! convolved into a small diffuse irradiance cube and a specular prefilter
//! cube whose mips hold increasing roughness. The split-sum BRDF table does
//! not depend on the environment and is rendered exactly once, when the
//! [`PbrManager`] is created.

use umbra_core::asset::Handle;
use umbra_core::math::{cube_face_projection, cube_face_views, Mat4};
use umbra_core::mesh::generate_cube;

use crate::error::GraphicsError;
use crate::mesh::Mesh;
use crate::renderer::Renderer;
use crate::resources::{Buffer, Shader, Texture};
use crate::shaders::{self, ShaderProvider};
use crate::types::{
    Binding, PipelineHandle, PipelineOptions, TextureDescriptor, TextureFormat, TextureHandle,
};
use crate::uniforms::{PrefilterUniform, SkyUniform};

pub const BRDF_LUT_SIZE: u32 = 256;
pub const MAX_PREFILTER_MIPS: u32 = 6;

/// Binding slots shared by the capture and convolution programs.
pub mod slots {
    pub const SOURCE: u32 = 1;
    pub const SAMPLER: u32 = 2;
    pub const PREFILTER: u32 = 3;
    /// The procedural sky reads its parameters from slot 1.
    pub const SKY: u32 = 1;
}

pub fn irradiance_resolution(resolution: u32) -> u32 {
    (resolution / 32).max(1)
}

pub fn prefilter_resolution(resolution: u32) -> u32 {
    (resolution / 4).max(16)
}

pub fn prefilter_mip_count(size: u32) -> u32 {
    TextureDescriptor::full_mip_count(size).min(MAX_PREFILTER_MIPS)
}

/// Roughness stored in prefilter mip `mip` of a `mips`-level chain.
pub fn prefilter_roughness(mip: u32, mips: u32) -> f32 {
    if mips <= 1 {
        0.0
    } else {
        mip as f32 / (mips - 1) as f32
    }
}

/// What an environment is captured from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnvironmentSource {
    /// A 2D equirectangular (latitude/longitude) HDR texture.
    Equirect(TextureHandle),
    Procedural(SkyUniform),
}

/// A captured environment and its convolutions.
#[derive(Debug)]
pub struct Environment {
    resolution: u32,
    cubemap: Texture,
    irradiance: Texture,
    prefilter: Texture,
}

impl Environment {
    fn allocate(renderer: &mut Renderer, resolution: u32) -> Result<Self, GraphicsError> {
        let cube = |size: u32, mips: u32, label: &str| {
            TextureDescriptor::new_cube(size, TextureFormat::Rgba16Float)
                .attachment()
                .with_mips(mips)
                .with_label(label)
        };
        let prefilter_size = prefilter_resolution(resolution);
        Ok(Self {
            resolution,
            cubemap: renderer.create_texture(&cube(
                resolution,
                TextureDescriptor::full_mip_count(resolution),
                "environment/cubemap",
            ))?,
            irradiance: renderer.create_texture(&cube(
                irradiance_resolution(resolution),
                1,
                "environment/irradiance",
            ))?,
            prefilter: renderer.create_texture(&cube(
                prefilter_size,
                prefilter_mip_count(prefilter_size),
                "environment/prefilter",
            ))?,
        })
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn cubemap(&self) -> &Texture {
        &self.cubemap
    }

    pub fn irradiance(&self) -> &Texture {
        &self.irradiance
    }

    pub fn prefilter(&self) -> &Texture {
        &self.prefilter
    }
}

pub struct PbrManager {
    brdf_lut: Texture,
    cube: Mesh,
    cube_vs: Handle<Shader>,
    equirect_fs: Handle<Shader>,
    sky_fs: Handle<Shader>,
    irradiance_fs: Handle<Shader>,
    prefilter_fs: Handle<Shader>,
    sky_uniform: Buffer,
    prefilter_uniform: Buffer,
    brdf_renders: u32,
    allocations: u32,
}

impl PbrManager {
    /// Loads the capture programs and renders the BRDF table.
    pub fn new(renderer: &mut Renderer, shaders: &mut dyn ShaderProvider) -> Result<Self, GraphicsError> {
        let cube = Mesh::from_cpu(renderer, &generate_cube(1.0))?;
        let sky_uniform = renderer.create_uniform("pbr/sky", &SkyUniform::default())?;
        let prefilter_uniform = renderer.create_uniform(
            "pbr/prefilter",
            &PrefilterUniform {
                params: [0.0; 4],
            },
        )?;
        let brdf_lut = renderer.create_texture(
            &TextureDescriptor::new_2d(BRDF_LUT_SIZE, BRDF_LUT_SIZE, TextureFormat::Rg16Float)
                .attachment()
                .with_label("pbr/brdf_lut"),
        )?;

        let mut manager = Self {
            brdf_lut,
            cube,
            cube_vs: shaders.shader(renderer, shaders::CUBEMAP_VS.name),
            equirect_fs: shaders.shader(renderer, shaders::EQUIRECT_TO_CUBE_FS.name),
            sky_fs: shaders.shader(renderer, shaders::PROCEDURAL_SKY_FS.name),
            irradiance_fs: shaders.shader(renderer, shaders::IRRADIANCE_FS.name),
            prefilter_fs: shaders.shader(renderer, shaders::PREFILTER_FS.name),
            sky_uniform,
            prefilter_uniform,
            brdf_renders: 0,
            allocations: 0,
        };
        manager.render_brdf_lut(renderer, shaders)?;
        Ok(manager)
    }

    fn render_brdf_lut(&mut self, renderer: &mut Renderer, shaders: &mut dyn ShaderProvider) -> Result<(), GraphicsError> {
        let vertex = shaders.shader(renderer, shaders::FULLSCREEN_VS.name);
        let fragment = shaders.shader(renderer, shaders::BRDF_LUT_FS.name);
        let pipeline = pipeline(renderer, &vertex, &fragment);
        let quad = Mesh::fullscreen_quad(renderer)?;
        let target = renderer.create_render_target_from_views(
            "pbr/brdf_lut",
            (BRDF_LUT_SIZE, BRDF_LUT_SIZE),
            vec![self.brdf_lut.view()],
            None,
        )?;

        renderer.begin();
        renderer.render_pass(&target, pipeline, &[], |setup| quad.setup_buffers(setup), |pass| quad.draw(pass))?;
        renderer.end();
        self.brdf_renders += 1;
        log::debug!("PbrManager: BRDF LUT rendered ({BRDF_LUT_SIZE}x{BRDF_LUT_SIZE})");
        Ok(())
    }

    pub fn brdf_lut(&self) -> &Texture {
        &self.brdf_lut
    }

    /// How many times the BRDF table has been rendered. Always one.
    pub fn brdf_lut_renders(&self) -> u32 {
        self.brdf_renders
    }

    /// How many environment texture sets have been allocated.
    pub fn allocations(&self) -> u32 {
        self.allocations
    }

    /// Captures `source` into `environment` at `resolution`.
    ///
    /// The texture set is allocated from scratch when there is none yet or
    /// the resolution changed; it is never resized in place. Each face is
    /// rendered in its own [`Renderer::begin`] scope so it is cleared first.
    pub fn update_environment(
        &mut self,
        renderer: &mut Renderer,
        environment: &mut Option<Environment>,
        source: EnvironmentSource,
        resolution: u32,
    ) -> Result<(), GraphicsError> {
        let resolution = resolution.max(1);
        let needs_allocation = environment
            .as_ref()
            .map_or(true, |env| env.resolution() != resolution);
        if needs_allocation {
            *environment = Some(Environment::allocate(renderer, resolution)?);
            self.allocations += 1;
            log::debug!("PbrManager: allocated environment at {resolution}");
        }
        let Some(env) = environment.as_ref() else {
            return Ok(());
        };

        let fallbacks = renderer.fallbacks()?;
        let sampler = fallbacks.linear_sampler.handle();

        // Capture.
        let (fragment, resources) = match source {
            EnvironmentSource::Equirect(texture) => (
                &self.equirect_fs,
                vec![Binding::texture(slots::SOURCE, texture), Binding::sampler(slots::SAMPLER, sampler)],
            ),
            EnvironmentSource::Procedural(sky) => {
                renderer.write_uniform(&self.sky_uniform, &sky)?;
                (&self.sky_fs, vec![Binding::buffer(slots::SKY, self.sky_uniform.handle())])
            }
        };
        let capture = pipeline(renderer, &self.cube_vs, fragment);
        self.render_faces(renderer, env.cubemap(), 0, capture, &resources)?;
        renderer.generate_mipmaps(env.cubemap())?;

        // Diffuse irradiance.
        let convolution = [
            Binding::texture(slots::SOURCE, env.cubemap().handle()),
            Binding::sampler(slots::SAMPLER, sampler),
        ];
        let irradiance = pipeline(renderer, &self.cube_vs, &self.irradiance_fs);
        self.render_faces(renderer, env.irradiance(), 0, irradiance, &convolution)?;

        // Specular prefilter, one roughness per mip.
        let prefilter = pipeline(renderer, &self.cube_vs, &self.prefilter_fs);
        let mips = env.prefilter().mip_levels();
        for mip in 0..mips {
            let values = PrefilterUniform {
                params: [prefilter_roughness(mip, mips), resolution as f32, 0.0, 0.0],
            };
            renderer.write_uniform(&self.prefilter_uniform, &values)?;
            let mut resources = convolution.to_vec();
            resources.push(Binding::buffer(slots::PREFILTER, self.prefilter_uniform.handle()));
            self.render_faces(renderer, env.prefilter(), mip, prefilter, &resources)?;
        }
        Ok(())
    }

    fn render_faces(
        &self,
        renderer: &mut Renderer,
        texture: &Texture,
        mip: u32,
        pipeline: Option<PipelineHandle>,
        resources: &[Binding],
    ) -> Result<(), GraphicsError> {
        let (width, height) = texture.descriptor().mip_size(mip);
        let projection = renderer.matrices().projection();
        renderer.matrices_mut().push_matrix();
        renderer.matrices_mut().set_model(Mat4::IDENTITY);
        renderer.matrices_mut().set_projection(cube_face_projection());

        let mut result = Ok(());
        for (face, view) in cube_face_views().into_iter().enumerate() {
            result = renderer
                .create_render_target_from_views(
                    texture.label().unwrap_or("cube face"),
                    (width, height),
                    vec![texture.layer_view(face as u32, mip)],
                    None,
                )
                .and_then(|target| {
                    renderer.matrices_mut().set_view(view);
                    renderer.begin();
                    let cube = &self.cube;
                    let pass = renderer.render_pass(
                        &target,
                        pipeline,
                        resources,
                        |setup| cube.setup_buffers(setup),
                        |pass| cube.draw(pass),
                    );
                    renderer.end();
                    pass
                });
            if result.is_err() {
                break;
            }
        }

        renderer.matrices_mut().pop_matrix();
        renderer.matrices_mut().set_projection(projection);
        result
    }
}

fn pipeline(renderer: &mut Renderer, vertex: &Handle<Shader>, fragment: &Handle<Shader>) -> Option<PipelineHandle> {
    let vertex = vertex.read();
    let fragment = fragment.read();
    renderer
        .create_pipeline_state_with(&vertex, &fragment, PipelineOptions::fullscreen())
        .map_err(|err| log::warn!("PbrManager: {err}"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::shaders::BuiltinShaders;
    use rstest::rstest;
    use umbra_core::math::Vec3;

    fn manager() -> (Renderer, PbrManager) {
        let mut renderer = Renderer::with_backend(Box::new(SoftwareBackend::new()), 8, 8);
        let manager = PbrManager::new(&mut renderer, &mut BuiltinShaders::new()).unwrap();
        (renderer, manager)
    }

    fn sky() -> EnvironmentSource {
        EnvironmentSource::Procedural(SkyUniform::new(Vec3::Y, 1.0, Vec3::Z, Vec3::ONE, Vec3::ZERO))
    }

    #[rstest]
    #[case(0, 6, 0.0)]
    #[case(5, 6, 1.0)]
    #[case(2, 5, 0.5)]
    #[case(0, 1, 0.0)]
    fn roughness_per_mip(#[case] mip: u32, #[case] mips: u32, #[case] expected: f32) {
        assert!((prefilter_roughness(mip, mips) - expected).abs() < 1e-6);
    }

    #[test]
    fn derived_resolutions() {
        assert_eq!(irradiance_resolution(512), 16);
        assert_eq!(irradiance_resolution(16), 1);
        assert_eq!(prefilter_resolution(512), 128);
        assert_eq!(prefilter_resolution(32), 16);
        assert_eq!(prefilter_mip_count(128), 6);
        assert_eq!(prefilter_mip_count(16), 5);
    }

    #[test]
    fn brdf_lut_rendered_once() {
        let (mut renderer, mut manager) = manager();
        assert_eq!(manager.brdf_lut_renders(), 1);
        assert_eq!(manager.brdf_lut().size(), (BRDF_LUT_SIZE, BRDF_LUT_SIZE));

        let mut env = None;
        manager.update_environment(&mut renderer, &mut env, sky(), 32).unwrap();
        manager.update_environment(&mut renderer, &mut env, sky(), 64).unwrap();
        assert_eq!(manager.brdf_lut_renders(), 1);
    }

    #[test]
    fn reallocates_only_when_missing_or_resized() {
        let (mut renderer, mut manager) = manager();
        let mut env = None;

        manager.update_environment(&mut renderer, &mut env, sky(), 32).unwrap();
        let first = env.as_ref().unwrap().cubemap().handle();
        manager.update_environment(&mut renderer, &mut env, sky(), 32).unwrap();
        assert_eq!(manager.allocations(), 1);
        assert_eq!(env.as_ref().unwrap().cubemap().handle(), first);

        manager.update_environment(&mut renderer, &mut env, sky(), 64).unwrap();
        assert_eq!(manager.allocations(), 2);
        renderer.collect_garbage();
        assert_eq!(renderer.release_count(first), 1);

        let env = env.unwrap();
        assert_eq!(env.resolution(), 64);
        assert_eq!(env.irradiance().width(), 2);
        assert_eq!(env.prefilter().width(), 16);
        assert_eq!(env.prefilter().mip_levels(), 5);
    }

    #[test]
    fn every_face_and_mip_gets_its_own_cleared_pass() {
        let (mut renderer, mut manager) = manager();
        renderer.submit().unwrap();
        let mut env = None;
        manager.update_environment(&mut renderer, &mut env, sky(), 32).unwrap();
        renderer.submit().unwrap();

        let mips = env.unwrap().prefilter().mip_levels();
        let passes = 6 + 6 + 6 * mips;
        let stats = renderer.last_frame_stats();
        assert_eq!(stats.passes, passes);
        assert_eq!(stats.clears, passes);
    }

    #[test]
    fn matrices_are_restored() {
        let (mut renderer, mut manager) = manager();
        let projection = Mat4::from_scale(Vec3::splat(2.0));
        renderer.matrices_mut().set_projection(projection);
        let depth = renderer.matrices().depth();

        let mut env = None;
        manager.update_environment(&mut renderer, &mut env, sky(), 16).unwrap();
        assert_eq!(renderer.matrices().projection(), projection);
        assert_eq!(renderer.matrices().depth(), depth);
    }
}
