extern crate proc_macro;

use itertools::izip;
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, LitStr};

/// Options parsed from `#[nibblepack(...)]` on a type, field or variant.
///
/// * `rename = "Name"` - registered type name (on a type) or diagnostic name (on a field/variant)
/// * `skip` - leave a field out of the schema; it decodes to `Default::default()`
#[derive(Debug, Default)]
struct Attributes {
    rename: Option<String>,
    skip: bool,
}

fn parse_attributes(attrs: &[Attribute]) -> syn::Result<Attributes> {
    let mut out = Attributes::default();
    for attr in attrs {
        if !attr.path().is_ident("nibblepack") {
            continue;
        }
        attr.parse_args_with(|input: syn::parse::ParseStream| {
            while !input.is_empty() {
                let ident = input.parse::<syn::Ident>()?;
                if ident == "rename" {
                    input.parse::<syn::Token![=]>()?;
                    out.rename = Some(input.parse::<LitStr>()?.value());
                } else if ident == "skip" {
                    out.skip = true;
                } else {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("Unknown attribute: {}", ident),
                    ));
                }

                if input.peek(syn::Token![,]) {
                    input.parse::<syn::Token![,]>()?;
                }
            }
            Ok(())
        })?;
    }
    Ok(out)
}

/// Derives `nibblepack::Record` and `nibblepack::FieldValue`.
///
/// Structs with named fields become record types; every non-skipped field must implement
/// `FieldValue`, and `Option<T>` fields are nullable. Enums whose variants are all unit
/// variants become enum kinds, encoded by declaration ordinal.
#[proc_macro_derive(Record, attributes(nibblepack))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Record cannot be derived for generic types",
        ));
    }
    let attrs = parse_attributes(&input.attrs)?;
    let type_name = attrs.rename.unwrap_or_else(|| input.ident.to_string());

    match &input.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(fields) => expand_struct(input, &type_name, fields),
            _ => Err(syn::Error::new_spanned(
                &input.ident,
                "Record can only be derived for structs with named fields",
            )),
        },
        Data::Enum(e) => expand_enum(input, &type_name, e),
        Data::Union(_) => Err(syn::Error::new_spanned(
            &input.ident,
            "Record cannot be derived for unions",
        )),
    }
}

fn expand_struct(
    input: &DeriveInput,
    type_name: &str,
    fields: &syn::FieldsNamed,
) -> syn::Result<TokenStream2> {
    let name = &input.ident;

    let mut idents = Vec::new();
    let mut types = Vec::new();
    let mut names = Vec::new();
    let mut skipped = Vec::new();
    for f in &fields.named {
        let attrs = parse_attributes(&f.attrs)?;
        let Some(ident) = f.ident.as_ref() else {
            continue;
        };
        if attrs.skip {
            skipped.push(ident);
            continue;
        }
        names.push(attrs.rename.unwrap_or_else(|| ident.to_string()));
        idents.push(ident);
        types.push(&f.ty);
    }

    let mut descriptor_fields = Vec::new();
    let mut collect = Vec::new();
    let mut write = Vec::new();
    let mut read = Vec::new();
    for (ident, ty, field_name, ordinal) in izip!(&idents, &types, &names, 0usize..) {
        descriptor_fields.push(quote! {
            .with_field(nibblepack::FieldDef {
                name: #field_name.to_owned(),
                ty: <#ty as nibblepack::FieldValue>::field_type(),
                nullable: <#ty as nibblepack::FieldValue>::NULLABLE,
            })
        });
        collect.push(quote! {
            <#ty as nibblepack::FieldValue>::collect_descriptors(out);
        });
        write.push(quote! {
            nibblepack::FieldValue::to_value(&self.#ident, graph)
        });
        read.push(quote! {
            #ident: nibblepack::record::read_field::<#ty>(fields, #ordinal, #field_name, graph)?
        });
    }

    Ok(quote! {
        impl nibblepack::Record for #name {
            const TYPE_NAME: &'static str = #type_name;

            fn descriptor() -> nibblepack::TypeDescriptor {
                nibblepack::TypeDescriptor::new(#type_name)
                    #(#descriptor_fields)*
            }

            fn collect_descriptors(out: &mut Vec<nibblepack::TypeDescriptor>) {
                if nibblepack::record::push_descriptor(out, <Self as nibblepack::Record>::descriptor()) {
                    #(#collect)*
                }
            }

            fn write_object(&self, graph: &mut nibblepack::ObjectGraph) -> nibblepack::ObjectId {
                let fields = vec![#(#write),*];
                graph.insert(#type_name, fields)
            }

            fn read_object(
                graph: &nibblepack::ObjectGraph,
                id: nibblepack::ObjectId,
            ) -> nibblepack::Result<Self> {
                let fields = nibblepack::record::object_fields(graph, id, #type_name)?;
                Ok(Self {
                    #(#read,)*
                    #(#skipped: ::core::default::Default::default(),)*
                })
            }
        }

        impl nibblepack::FieldValue for #name {
            fn field_type() -> nibblepack::FieldType {
                nibblepack::FieldType::object(#type_name)
            }

            fn to_value(&self, graph: &mut nibblepack::ObjectGraph) -> nibblepack::Value {
                nibblepack::Value::Object(nibblepack::Record::write_object(self, graph))
            }

            fn from_value(
                value: &nibblepack::Value,
                graph: &nibblepack::ObjectGraph,
            ) -> nibblepack::Result<Self> {
                match value {
                    nibblepack::Value::Object(id) => {
                        <Self as nibblepack::Record>::read_object(graph, *id)
                    }
                    other => Err(nibblepack::record::unexpected(#type_name, other)),
                }
            }

            fn collect_descriptors(out: &mut Vec<nibblepack::TypeDescriptor>) {
                <Self as nibblepack::Record>::collect_descriptors(out);
            }
        }
    })
}

fn expand_enum(
    input: &DeriveInput,
    type_name: &str,
    data: &syn::DataEnum,
) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    if data.variants.is_empty() {
        return Err(syn::Error::new_spanned(
            name,
            "Record cannot be derived for enums without variants",
        ));
    }
    if data.variants.len() > u16::MAX as usize {
        return Err(syn::Error::new_spanned(name, "Too many enum variants"));
    }

    let mut idents = Vec::new();
    let mut names = Vec::new();
    for v in &data.variants {
        if !matches!(v.fields, Fields::Unit) {
            return Err(syn::Error::new_spanned(
                v,
                "Record can only be derived for enums with unit variants",
            ));
        }
        let attrs = parse_attributes(&v.attrs)?;
        names.push(attrs.rename.unwrap_or_else(|| v.ident.to_string()));
        idents.push(&v.ident);
    }
    let ordinals: Vec<u16> = (0..idents.len() as u16).collect();

    Ok(quote! {
        impl nibblepack::FieldValue for #name {
            fn field_type() -> nibblepack::FieldType {
                nibblepack::FieldType::enumeration(#type_name, [#(#names),*])
            }

            fn to_value(&self, _graph: &mut nibblepack::ObjectGraph) -> nibblepack::Value {
                nibblepack::Value::Enum(match self {
                    #(Self::#idents => #ordinals,)*
                })
            }

            fn from_value(
                value: &nibblepack::Value,
                _graph: &nibblepack::ObjectGraph,
            ) -> nibblepack::Result<Self> {
                match value {
                    #(nibblepack::Value::Enum(#ordinals) => Ok(Self::#idents),)*
                    other => Err(nibblepack::record::unexpected(#type_name, other)),
                }
            }
        }
    })
}
