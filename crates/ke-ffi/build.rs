fn main() {
    let crate_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    let config = cbindgen::Config::from_file("cbindgen.toml")
        .unwrap_or_default();

    println!("cargo:rerun-if-changed=src");
    println!("cargo:rerun-if-changed=cbindgen.toml");

    match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) => {
            let include = format!("{}/include", crate_dir);
            if let Err(err) = std::fs::create_dir_all(&include) {
                println!("cargo:warning=cannot create {}: {}", include, err);
                return;
            }
            bindings.write_to_file(format!("{}/ke_engine.h", include));
        }
        // Keep the previous header when generation fails.
        Err(err) => println!("cargo:warning=C header not regenerated: {}", err),
    }
}
