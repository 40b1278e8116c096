//! Background sky, drawn into the frame before the lighting resolve.
//!
//! The resolve leaves background pixels (depth at the far plane) untouched,
//! so whatever the sky wrote there survives into the composite.

use serde::{Deserialize, Serialize};
use umbra_core::asset::Handle;
use umbra_core::math::{Mat4, Vec3};
use umbra_core::mesh::generate_cube;

use crate::error::GraphicsError;
use crate::mesh::Mesh;
use crate::renderer::Renderer;
use crate::resources::{Buffer, RenderTarget, Shader};
use crate::shaders::{self, ShaderProvider};
use crate::types::{Binding, PipelineHandle, PipelineOptions, TextureHandle};
use crate::uniforms::SkyUniform;

pub mod slots {
    pub const CUBEMAP: u32 = 1;
    pub const SAMPLER: u32 = 2;
    pub const SKY: u32 = 1;
}

/// Parameters of the analytic sky.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProceduralSky {
    pub sun_direction: Vec3,
    pub sun_intensity: f32,
    pub zenith: Vec3,
    pub horizon: Vec3,
    pub ground: Vec3,
}

impl Default for ProceduralSky {
    fn default() -> Self {
        let uniform = SkyUniform::default();
        Self {
            sun_direction: Vec3::from_slice(&uniform.sun[..3]),
            sun_intensity: uniform.sun[3],
            zenith: Vec3::from_slice(&uniform.zenith[..3]),
            horizon: Vec3::from_slice(&uniform.horizon[..3]),
            ground: Vec3::from_slice(&uniform.ground[..3]),
        }
    }
}

impl ProceduralSky {
    pub fn uniform(&self) -> SkyUniform {
        SkyUniform::new(self.sun_direction, self.sun_intensity, self.zenith, self.horizon, self.ground)
    }
}

pub struct SkyRenderer {
    cube: Mesh,
    vertex: Handle<Shader>,
    skybox: Handle<Shader>,
    procedural: Handle<Shader>,
    uniform: Buffer,
}

impl SkyRenderer {
    pub fn new(renderer: &mut Renderer, shaders: &mut dyn ShaderProvider) -> Result<Self, GraphicsError> {
        Ok(Self {
            cube: Mesh::from_cpu(renderer, &generate_cube(1.0))?,
            vertex: shaders.shader(renderer, shaders::CUBEMAP_VS.name),
            skybox: shaders.shader(renderer, shaders::SKYBOX_FS.name),
            procedural: shaders.shader(renderer, shaders::PROCEDURAL_SKY_FS.name),
            uniform: renderer.create_uniform("sky", &SkyUniform::default())?,
        })
    }

    fn pipeline(&self, renderer: &mut Renderer, fragment: &Handle<Shader>) -> Option<PipelineHandle> {
        let vertex = self.vertex.read();
        let fragment = fragment.read();
        renderer
            .create_pipeline_state_with(&vertex, &fragment, PipelineOptions::fullscreen())
            .map_err(|err| log::warn!("SkyRenderer: {err}"))
            .ok()
    }

    /// Draws an environment cubemap around the current camera.
    pub fn draw_skybox(
        &self,
        renderer: &mut Renderer,
        cubemap: TextureHandle,
        target: &RenderTarget,
    ) -> Result<(), GraphicsError> {
        let pipeline = self.pipeline(renderer, &self.skybox);
        let sampler = renderer.fallbacks()?.linear_sampler.handle();
        self.draw(
            renderer,
            pipeline,
            &[Binding::texture(slots::CUBEMAP, cubemap), Binding::sampler(slots::SAMPLER, sampler)],
            None,
            target,
        )
    }

    /// Draws the analytic sky around the current camera.
    pub fn draw_procedural(
        &self,
        renderer: &mut Renderer,
        sky: &ProceduralSky,
        target: &RenderTarget,
    ) -> Result<(), GraphicsError> {
        let pipeline = self.pipeline(renderer, &self.procedural);
        self.draw(
            renderer,
            pipeline,
            &[Binding::buffer(slots::SKY, self.uniform.handle())],
            Some(sky.uniform()),
            target,
        )
    }

    fn draw(
        &self,
        renderer: &mut Renderer,
        pipeline: Option<PipelineHandle>,
        resources: &[Binding],
        sky: Option<SkyUniform>,
        target: &RenderTarget,
    ) -> Result<(), GraphicsError> {
        renderer.matrices_mut().push_matrix();
        renderer.matrices_mut().set_model(Mat4::IDENTITY);
        let cube = &self.cube;
        let uniform = &self.uniform;
        let result = renderer.render_pass(
            target,
            pipeline,
            resources,
            |setup| {
                cube.setup_buffers(setup);
                if let Some(sky) = sky {
                    setup.write_uniform(uniform, &sky);
                }
            },
            |pass| cube.draw(pass),
        );
        renderer.matrices_mut().pop_matrix();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::resources::RenderTargetConfig;
    use crate::shaders::BuiltinShaders;
    use crate::types::TextureFormat;

    #[test]
    fn sky_passes_balance_the_matrix_stack() {
        let mut renderer = Renderer::with_backend(Box::new(SoftwareBackend::new()), 8, 8);
        let sky = SkyRenderer::new(&mut renderer, &mut BuiltinShaders::new()).unwrap();
        let target = renderer
            .create_render_target(&RenderTargetConfig::new(8, 8).with_color(TextureFormat::Rgba16Float))
            .unwrap();
        let cube = renderer.fallbacks().unwrap().black_cube.handle();

        renderer.begin();
        sky.draw_procedural(&mut renderer, &ProceduralSky::default(), &target).unwrap();
        sky.draw_skybox(&mut renderer, cube, &target).unwrap();
        assert_eq!(renderer.matrices().depth(), 1);
        assert_eq!(renderer.frame_stats().passes, 2);
        assert_eq!(renderer.frame_stats().clears, 1);
    }

    #[test]
    fn procedural_defaults_match_uniform_defaults() {
        let packed = ProceduralSky::default().uniform();
        let expected = SkyUniform::default();
        assert_eq!(packed.zenith, expected.zenith);
        assert_eq!(packed.ground, expected.ground);
        let sun = Vec3::from_slice(&packed.sun[..3]);
        assert!((sun - Vec3::from_slice(&expected.sun[..3])).length() < 1e-5);
    }
}
