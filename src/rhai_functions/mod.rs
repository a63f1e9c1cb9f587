use rhai::{Dynamic, Engine, Map, Module};
use std::sync::Arc;

use crate::record::Schema;

pub mod emit;
pub mod record;

/// Register every host function and type scripts can use.
///
/// The schema's name table is published as `schema::fields`, a map from
/// field name to index that script functions can read directly.
pub fn register_all_functions(engine: &mut Engine, schema: &Arc<Schema>) {
    record::register_functions(engine);
    emit::register_functions(engine, schema);
    engine.register_static_module("schema", Arc::new(schema_module(schema)));
}

fn schema_module(schema: &Schema) -> Module {
    let mut fields = Map::new();
    let mut names = rhai::Array::new();
    for (name, index) in schema.names() {
        fields.insert(name.into(), Dynamic::from(index as i64));
        names.push(Dynamic::from(name.to_string()));
    }

    let mut module = Module::new();
    module.set_var("fields", fields);
    module.set_var("names", names);
    module.set_var("len", schema.len() as i64);
    module.build_index();
    module
}
