//! Derive macros for the Dust particle pool.
//!
//! This crate provides one derive macro:
//!
//! - [`GpuStruct`] - Generates the WGSL struct definition for a `#[repr(C)]`
//!   host struct and checks, at compile time, that the host layout matches
//!   the WGSL layout byte for byte.
//!
//! # Usage
//!
//! The macro is re-exported from the main `dust` crate. You don't need
//! to add this crate directly:
//!
//! ```ignore
//! use dust::GpuStruct;
//!
//! #[repr(C)]
//! #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, GpuStruct)]
//! struct Spark {
//!     position: [f32; 3],
//!     age: f32,
//! }
//! ```
//!
//! # GPU Memory Layout
//!
//! WGSL alignment differs from Rust. A `[f32; 3]` is 4-byte aligned on the
//! host but `vec3<f32>` is 16-byte aligned on the device. The macro does not
//! insert padding for you; it computes the WGSL offset of every field and
//! emits `const` assertions against `core::mem::offset_of!`, so a struct that
//! would be read differently by the kernels does not compile.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Expr, ExprLit, Fields, Lit, Type};

/// WGSL type, alignment and size of a supported host field type.
struct WgslField {
    ty: String,
    align: usize,
    size: usize,
}

/// Derive macro for host structs shared with WGSL kernels.
///
/// # Supported Types
///
/// | Rust Type | WGSL Type | Size | Alignment |
/// |-----------|-----------|------|-----------|
/// | `f32` / `u32` / `i32` | `f32` / `u32` / `i32` | 4 | 4 |
/// | `[f32; 2]` | `vec2<f32>` | 8 | 8 |
/// | `[f32; 3]` | `vec3<f32>` | 12 | 16 |
/// | `[f32; 4]` | `vec4<f32>` | 16 | 16 |
/// | `[u32; N]` / `[i32; N]` | `vecN<u32>` / `vecN<i32>` | 4N | as above |
/// | `[[f32; 4]; 4]` | `mat4x4<f32>` | 64 | 16 |
///
/// # Generated Items
///
/// - `impl dust::GpuStruct` with `WGSL_NAME`, `WGSL_STRUCT` and `WGSL_SIZE`
/// - a `const` block asserting `size_of` and every `offset_of!`
///
/// # Panics
///
/// The macro panics at compile time if:
/// - Applied to anything other than a struct with named fields
/// - The struct is not `#[repr(C)]`
/// - A field has an unsupported type
#[proc_macro_derive(GpuStruct)]
pub fn derive_gpu_struct(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    if !has_repr_c(&input) {
        panic!("GpuStruct requires #[repr(C)] on '{}'", name);
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => panic!("GpuStruct only supports structs with named fields"),
        },
        _ => panic!("GpuStruct only supports structs"),
    };

    let mut wgsl = format!("struct {} {{\n", name);
    let mut offset = 0usize;
    let mut struct_align = 4usize;
    let mut offset_checks = Vec::new();

    for field in fields.iter() {
        let ident = field.ident.as_ref().expect("named field");
        let info = wgsl_field(&field.ty).unwrap_or_else(|| {
            panic!(
                "GpuStruct: unsupported type for field '{}' of '{}'",
                ident, name
            )
        });

        offset = round_up(offset, info.align);
        struct_align = struct_align.max(info.align);
        wgsl.push_str(&format!("    {}: {},\n", ident, info.ty));

        let message = format!(
            "field '{}' of '{}' must sit at WGSL offset {}",
            ident, name, offset
        );
        offset_checks.push(quote! {
            assert!(::core::mem::offset_of!(#name, #ident) == #offset, #message);
        });

        offset += info.size;
    }
    wgsl.push_str("}\n");

    let size = round_up(offset, struct_align);
    let size_message = format!("'{}' must be {} bytes to match its WGSL layout", name, size);
    let name_str = name.to_string();

    let expanded = quote! {
        impl dust::GpuStruct for #name {
            const WGSL_NAME: &'static str = #name_str;
            const WGSL_STRUCT: &'static str = #wgsl;
            const WGSL_SIZE: usize = #size;
        }

        const _: () = {
            assert!(::core::mem::size_of::<#name>() == #size, #size_message);
            #(#offset_checks)*
        };
    };

    TokenStream::from(expanded)
}

fn has_repr_c(input: &DeriveInput) -> bool {
    let mut is_c = false;
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("repr")) {
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("C") {
                is_c = true;
            }
            Ok(())
        });
    }
    is_c
}

fn round_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

fn scalar_name(ty: &Type) -> Option<&'static str> {
    match ty {
        Type::Path(path) => {
            let ident = &path.path.segments.last()?.ident;
            match ident.to_string().as_str() {
                "f32" => Some("f32"),
                "u32" => Some("u32"),
                "i32" => Some("i32"),
                _ => None,
            }
        }
        _ => None,
    }
}

fn array_len(expr: &Expr) -> Option<usize> {
    match expr {
        Expr::Lit(ExprLit { lit: Lit::Int(int), .. }) => int.base10_parse().ok(),
        _ => None,
    }
}

fn wgsl_field(ty: &Type) -> Option<WgslField> {
    if let Some(scalar) = scalar_name(ty) {
        return Some(WgslField { ty: scalar.to_string(), align: 4, size: 4 });
    }

    let Type::Array(array) = ty else {
        return None;
    };
    let len = array_len(&array.len)?;

    if let Some(scalar) = scalar_name(&array.elem) {
        let align = match len {
            2 => 8,
            3 | 4 => 16,
            _ => return None,
        };
        return Some(WgslField {
            ty: format!("vec{}<{}>", len, scalar),
            align,
            size: 4 * len,
        });
    }

    // [[f32; 4]; 4] is a column-major mat4x4
    if let Type::Array(column) = &*array.elem {
        if len == 4 && array_len(&column.len)? == 4 && scalar_name(&column.elem)? == "f32" {
            return Some(WgslField { ty: "mat4x4<f32>".to_string(), align: 16, size: 64 });
        }
    }

    None
}
