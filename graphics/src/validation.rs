//! WGSL front-end checks shared by the backends.
//!
//! Every shader goes through naga before a backend accepts it. Parse and
//! validation failures become error diagnostics; a successful check yields
//! the set of bindings the stage's entry point actually uses, which backends
//! need to build bind groups that match automatic layouts.

use std::collections::BTreeSet;

use naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::types::{ShaderDescriptor, ShaderDiagnostics, ShaderStage};

/// Reflection data for a shader that passed validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderReflection {
    /// Group 0 binding slots used by the entry point.
    pub bindings: BTreeSet<u32>,
    /// `@location` inputs of a vertex entry point.
    pub vertex_inputs: BTreeSet<u32>,
}

/// Parses and validates `desc.source`.
///
/// Returns the diagnostics and, if there were no errors, the reflection.
pub fn check_wgsl(desc: &ShaderDescriptor) -> (ShaderDiagnostics, Option<ShaderReflection>) {
    let mut diagnostics = ShaderDiagnostics::default();

    if desc.source.trim().is_empty() {
        diagnostics.errors.push(format!("{}: empty shader source", desc.name));
        return (diagnostics, None);
    }

    let module = match naga::front::wgsl::parse_str(&desc.source) {
        Ok(module) => module,
        Err(err) => {
            diagnostics
                .errors
                .push(err.emit_to_string_with_path(&desc.source, desc.name.as_str()));
            return (diagnostics, None);
        }
    };

    let info = match Validator::new(ValidationFlags::all(), Capabilities::all()).validate(&module) {
        Ok(info) => info,
        Err(err) => {
            diagnostics
                .errors
                .push(err.emit_to_string_with_path(&desc.source, desc.name.as_str()));
            return (diagnostics, None);
        }
    };

    let stage = match desc.stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    };
    let entry_name = desc.stage.entry_point();
    let Some(index) = module
        .entry_points
        .iter()
        .position(|ep| ep.stage == stage && ep.name == entry_name)
    else {
        diagnostics.errors.push(format!(
            "{}: missing {:?} entry point `{entry_name}`",
            desc.name, desc.stage
        ));
        return (diagnostics, None);
    };

    let usage = info.get_entry_point(index);
    let bindings = module
        .global_variables
        .iter()
        .filter(|(handle, _)| !usage[*handle].is_empty())
        .filter_map(|(_, var)| var.binding.as_ref())
        .filter(|binding| binding.group == 0)
        .map(|binding| binding.binding)
        .collect();

    let vertex_inputs = match desc.stage {
        ShaderStage::Vertex => input_locations(&module, &module.entry_points[index].function),
        ShaderStage::Fragment => BTreeSet::new(),
    };

    (diagnostics, Some(ShaderReflection { bindings, vertex_inputs }))
}

fn input_locations(module: &naga::Module, function: &naga::Function) -> BTreeSet<u32> {
    let mut locations = BTreeSet::new();
    for argument in &function.arguments {
        match &argument.binding {
            Some(naga::Binding::Location { location, .. }) => {
                locations.insert(*location);
            }
            Some(naga::Binding::BuiltIn(_)) => {}
            None => {
                if let naga::TypeInner::Struct { members, .. } = &module.types[argument.ty].inner {
                    locations.extend(members.iter().filter_map(|member| match member.binding {
                        Some(naga::Binding::Location { location, .. }) => Some(location),
                        _ => None,
                    }));
                }
            }
        }
    }
    locations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(source: &str) -> ShaderDescriptor {
        ShaderDescriptor::new("test.frag.wgsl", ShaderStage::Fragment, source)
    }

    #[test]
    fn valid_shader_reports_used_bindings() {
        let desc = fragment(
            r#"
            @group(0) @binding(1) var<uniform> tint: vec4<f32>;
            @group(0) @binding(2) var<uniform> unused: vec4<f32>;
            @fragment
            fn fs_main() -> @location(0) vec4<f32> {
                return tint;
            }
            "#,
        );
        let (diagnostics, reflection) = check_wgsl(&desc);
        assert!(diagnostics.is_clean(), "{diagnostics:?}");
        let bindings = reflection.unwrap().bindings;
        assert!(bindings.contains(&1));
        assert!(!bindings.contains(&2));
    }

    #[test]
    fn vertex_inputs_include_struct_members() {
        let desc = ShaderDescriptor::new(
            "test.vert.wgsl",
            ShaderStage::Vertex,
            r#"
            struct VertexInput {
                @location(0) position: vec3<f32>,
                @location(2) uv: vec2<f32>,
            };
            @vertex
            fn vs_main(input: VertexInput, @builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
                return vec4<f32>(input.position + vec3<f32>(input.uv, f32(index)), 1.0);
            }
            "#,
        );
        let (_, reflection) = check_wgsl(&desc);
        let inputs = reflection.unwrap().vertex_inputs;
        assert_eq!(inputs.into_iter().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn syntax_error_is_an_error_diagnostic() {
        let (diagnostics, reflection) = check_wgsl(&fragment("fn fs_main( {"));
        assert!(diagnostics.has_errors());
        assert!(reflection.is_none());
    }

    #[test]
    fn missing_entry_point_is_reported() {
        let desc = ShaderDescriptor::new(
            "test.vert.wgsl",
            ShaderStage::Vertex,
            "@fragment fn fs_main() {}",
        );
        let (diagnostics, _) = check_wgsl(&desc);
        assert!(diagnostics.errors[0].contains("vs_main"));
    }

    #[test]
    fn empty_source_is_rejected() {
        let (diagnostics, _) = check_wgsl(&fragment("   "));
        assert!(diagnostics.has_errors());
    }
}
