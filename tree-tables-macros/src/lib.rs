use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{format_ident, quote};
use syn::{
    parse_macro_input, spanned::Spanned, Attribute, Data, DeriveInput, Fields, Ident, LitBool,
    LitInt, LitStr, Path, Token, Type,
};

/// Implements `tree_tables::TreeModel` (and `ClosureTreeModel` or
/// `NestedSetModel`) for a SeaORM `Model`.
#[proc_macro_derive(TreeModel, attributes(tree))]
pub fn derive_tree_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match impl_tree_model(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct Options {
    entity_name: Option<String>,
    edge_module: Option<Path>,
    nested_set: bool,
    id_field: Option<String>,
    parent_field: Option<String>,
    sort_field: Option<String>,
    active_field: Option<String>,
    global_active_field: Option<String>,
    left_field: Option<String>,
    right_field: Option<String>,
    depth_field: Option<String>,
    edge_parent_field: Option<String>,
    edge_child_field: Option<String>,
    edge_depth_field: Option<String>,
    edge_sort_field: Option<String>,
    global_active: Option<bool>,
    default_sort: Option<i32>,
    constraint_delete: Option<bool>,
}

/// A model field together with its SeaORM `Column` variant.
struct FieldRef {
    field: Ident,
    column: Ident,
}

impl FieldRef {
    fn new(name: Option<String>, default: &str, span: Span) -> Self {
        let name = name.unwrap_or_else(|| default.to_owned());
        Self {
            field: Ident::new(&name, span),
            column: format_ident!("{}", to_pascal_case(&name)),
        }
    }
}

fn impl_tree_model(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let struct_ident = &input.ident;
    let span = struct_ident.span();

    let data_struct = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "TreeModel can only be derived for structs",
            ))
        }
    };

    let mut options = Options::default();
    let mut table_name: Option<String> = None;

    for attr in &input.attrs {
        if attr.path().is_ident("tree") {
            parse_tree_attr(attr, &mut options)?;
        }

        if attr.path().is_ident("sea_orm") {
            if let Some(name) = parse_sea_orm_table_name(attr)? {
                table_name = Some(name);
            }
        }
    }

    if options.nested_set && options.edge_module.is_some() {
        return Err(syn::Error::new(
            span,
            "`nested_set` and `edge_module` are mutually exclusive",
        ));
    }

    let id = FieldRef::new(options.id_field.take(), "id", span);
    let parent = FieldRef::new(options.parent_field.take(), "parent_id", span);
    let sort = FieldRef::new(options.sort_field.take(), "sort", span);
    let active = FieldRef::new(options.active_field.take(), "active", span);
    let global_active = FieldRef::new(options.global_active_field.take(), "global_active", span);

    let fields = match &data_struct.fields {
        Fields::Named(fields) => fields,
        _ => {
            return Err(syn::Error::new(
                data_struct.fields.span(),
                "TreeModel requires named fields",
            ))
        }
    };
    let id_type: Type = fields
        .named
        .iter()
        .find(|field| field.ident.as_ref() == Some(&id.field))
        .map(|field| field.ty.clone())
        .ok_or_else(|| {
            syn::Error::new(
                span,
                format!("no field `{}`; set `id_field` in #[tree]", id.field),
            )
        })?;

    let entity_name = options
        .entity_name
        .take()
        .or(table_name)
        .unwrap_or_else(|| struct_ident.to_string());
    let entity_name_literal = LitStr::new(&entity_name, span);

    let mut option_calls = Vec::new();
    if let Some(flag) = options.global_active {
        option_calls.push(quote! { .use_global_active(#flag) });
    }
    if let Some(sort) = options.default_sort {
        option_calls.push(quote! { .default_sort(::tree_tables::DefaultSort::Fixed(#sort)) });
    }
    if let Some(flag) = options.constraint_delete {
        option_calls.push(quote! { .constraint_delete(#flag) });
    }

    let FieldRef { field: id_field, column: id_column } = &id;
    let FieldRef { field: parent_field, column: parent_column } = &parent;
    let FieldRef { field: sort_field, column: sort_column } = &sort;
    let FieldRef { field: active_field, column: active_column } = &active;
    let FieldRef { field: global_active_field, column: global_active_column } = &global_active;

    let mut generated = quote! {
        impl ::tree_tables::TreeModel for #struct_ident {
            type Entity = Entity;
            type ActiveModel = ActiveModel;
            type Id = #id_type;

            fn tree_config() -> &'static ::tree_tables::TreeConfig {
                static CONFIG: ::tree_tables::__private::once_cell::sync::Lazy<
                    ::tree_tables::TreeConfig,
                > = ::tree_tables::__private::once_cell::sync::Lazy::new(|| {
                    ::tree_tables::TreeOptions::default()
                        #(#option_calls)*
                        .apply(::tree_tables::TreeConfig::new(#entity_name_literal))
                });
                &CONFIG
            }

            fn id(&self) -> Self::Id {
                self.#id_field.clone()
            }

            fn parent_id(&self) -> Option<Self::Id> {
                self.#parent_field.clone()
            }

            fn sort(&self) -> i32 {
                self.#sort_field
            }

            fn is_active(&self) -> bool {
                self.#active_field
            }

            fn is_global_active(&self) -> bool {
                self.#global_active_field
            }

            fn id_to_value(id: &Self::Id) -> ::sea_orm::Value {
                ::sea_orm::Value::from(id.clone())
            }

            fn set_parent(active: &mut Self::ActiveModel, parent: Option<Self::Id>) {
                active.#parent_field = ::sea_orm::ActiveValue::Set(parent);
            }

            fn pending_parent(active: &Self::ActiveModel) -> Option<Option<Self::Id>> {
                match &active.#parent_field {
                    ::sea_orm::ActiveValue::Set(value) => Some(value.clone()),
                    _ => None,
                }
            }

            fn pending_sort(active: &Self::ActiveModel) -> Option<i32> {
                match &active.#sort_field {
                    ::sea_orm::ActiveValue::Set(value) => Some(*value),
                    _ => None,
                }
            }

            fn pending_active(active: &Self::ActiveModel) -> Option<bool> {
                match &active.#active_field {
                    ::sea_orm::ActiveValue::Set(value) => Some(*value),
                    _ => None,
                }
            }

            fn id_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#id_column
            }

            fn parent_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#parent_column
            }

            fn sort_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#sort_column
            }

            fn active_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#active_column
            }

            fn global_active_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                Column::#global_active_column
            }
        }
    };

    if let Some(edge_module) = options.edge_module.take() {
        let edge_parent = FieldRef::new(options.edge_parent_field.take(), "parent_id", span);
        let edge_child = FieldRef::new(options.edge_child_field.take(), "child_id", span);
        let edge_depth = FieldRef::new(options.edge_depth_field.take(), "depth_level", span);
        let edge_sort = FieldRef::new(options.edge_sort_field.take(), "sort", span);

        let FieldRef { field: edge_parent_field, column: edge_parent_column } = &edge_parent;
        let FieldRef { field: edge_child_field, column: edge_child_column } = &edge_child;
        let FieldRef { field: edge_depth_field, column: edge_depth_column } = &edge_depth;
        let FieldRef { field: edge_sort_field, column: edge_sort_column } = &edge_sort;

        generated.extend(quote! {
            impl ::tree_tables::ClosureTreeModel for #struct_ident {
                type EdgeEntity = #edge_module::Entity;
                type EdgeModel = #edge_module::Model;

                fn edge_parent_column() -> <Self::EdgeEntity as ::sea_orm::EntityTrait>::Column {
                    #edge_module::Column::#edge_parent_column
                }

                fn edge_child_column() -> <Self::EdgeEntity as ::sea_orm::EntityTrait>::Column {
                    #edge_module::Column::#edge_child_column
                }

                fn edge_depth_column() -> <Self::EdgeEntity as ::sea_orm::EntityTrait>::Column {
                    #edge_module::Column::#edge_depth_column
                }

                fn edge_sort_column() -> <Self::EdgeEntity as ::sea_orm::EntityTrait>::Column {
                    #edge_module::Column::#edge_sort_column
                }

                fn edge_parent(edge: &Self::EdgeModel) -> Self::Id {
                    edge.#edge_parent_field.clone()
                }

                fn edge_child(edge: &Self::EdgeModel) -> Self::Id {
                    edge.#edge_child_field.clone()
                }

                fn edge_depth(edge: &Self::EdgeModel) -> i32 {
                    edge.#edge_depth_field
                }

                fn edge_sort(edge: &Self::EdgeModel) -> i32 {
                    edge.#edge_sort_field
                }
            }
        });
    }

    if options.nested_set {
        let left = FieldRef::new(options.left_field.take(), "left_margin", span);
        let right = FieldRef::new(options.right_field.take(), "right_margin", span);
        let depth = FieldRef::new(options.depth_field.take(), "depth_level", span);

        let FieldRef { field: left_field, column: left_column } = &left;
        let FieldRef { field: right_field, column: right_column } = &right;
        let FieldRef { field: depth_field, column: depth_column } = &depth;

        generated.extend(quote! {
            impl ::tree_tables::NestedSetModel for #struct_ident {
                fn left_margin(&self) -> i32 {
                    self.#left_field
                }

                fn right_margin(&self) -> i32 {
                    self.#right_field
                }

                fn depth(&self) -> i32 {
                    self.#depth_field
                }

                fn left_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                    Column::#left_column
                }

                fn right_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                    Column::#right_column
                }

                fn depth_column() -> <Self::Entity as ::sea_orm::EntityTrait>::Column {
                    Column::#depth_column
                }
            }
        });
    }

    Ok(generated)
}

fn parse_tree_attr(attr: &Attribute, options: &mut Options) -> syn::Result<()> {
    attr.parse_nested_meta(|meta| {
        let ident = meta
            .path
            .get_ident()
            .ok_or_else(|| syn::Error::new(meta.path.span(), "Invalid option key"))?
            .to_string();

        let string = |slot: &mut Option<String>| -> syn::Result<()> {
            let value: LitStr = meta.value()?.parse()?;
            *slot = Some(value.value());
            Ok(())
        };

        match ident.as_str() {
            "nested_set" => options.nested_set = true,
            "edge_module" => {
                let value: LitStr = meta.value()?.parse()?;
                options.edge_module = Some(parse_path(&value.value(), value.span())?);
            }
            "entity_name" => string(&mut options.entity_name)?,
            "id_field" => string(&mut options.id_field)?,
            "parent_field" => string(&mut options.parent_field)?,
            "sort_field" => string(&mut options.sort_field)?,
            "active_field" => string(&mut options.active_field)?,
            "global_active_field" => string(&mut options.global_active_field)?,
            "left_field" => string(&mut options.left_field)?,
            "right_field" => string(&mut options.right_field)?,
            "depth_field" => string(&mut options.depth_field)?,
            "edge_parent_field" => string(&mut options.edge_parent_field)?,
            "edge_child_field" => string(&mut options.edge_child_field)?,
            "edge_depth_field" => string(&mut options.edge_depth_field)?,
            "edge_sort_field" => string(&mut options.edge_sort_field)?,
            "global_active" => {
                let value: LitBool = meta.value()?.parse()?;
                options.global_active = Some(value.value);
            }
            "default_sort" => {
                let value: LitInt = meta.value()?.parse()?;
                options.default_sort = Some(value.base10_parse()?);
            }
            "constraint_delete" => {
                let value: LitBool = meta.value()?.parse()?;
                options.constraint_delete = Some(value.value);
            }
            other => {
                return Err(syn::Error::new(
                    meta.path.span(),
                    format!("Unsupported tree option `{other}`"),
                ));
            }
        }

        Ok(())
    })
}

/// Pull `table_name` out of `#[sea_orm(...)]`, skipping every other key.
fn parse_sea_orm_table_name(attr: &Attribute) -> syn::Result<Option<String>> {
    let mut table_name: Option<String> = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("table_name") {
            let value: LitStr = meta.value()?.parse()?;
            table_name = Some(value.value());
        } else if meta.input.peek(Token![=]) {
            let _: syn::Expr = meta.value()?.parse()?;
        }
        Ok(())
    })?;
    Ok(table_name)
}

fn parse_path(value: &str, span: Span) -> syn::Result<Path> {
    syn::parse_str::<Path>(value).map_err(|_| syn::Error::new(span, "Invalid path"))
}

fn to_pascal_case(value: &str) -> String {
    value
        .split('_')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
