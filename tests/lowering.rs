use std::path::PathBuf;

use mir2arm::{compile_package, BuildConfig};

// -------------------------------------------------------------------------------------------------

#[test]
fn mir_to_arm_tests() {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let dir: PathBuf = format!("{}/tests/lowering", manifest_dir).into();
    for entry in std::fs::read_dir(dir).unwrap() {
        // We're only interested in the `.mir` files here.
        let path = entry.unwrap().path();
        match path.extension().unwrap().to_str() {
            Some("mir") => {
                //
                // Run the tests!
                //
                test_lowering(path);
            }
            Some("asm") => (),
            _ => panic!(
                "File with invalid extension in tests dir: {:?}",
                path.file_name().unwrap_or(path.as_os_str())
            ),
        }
    }
}

fn test_lowering(mut path: PathBuf) {
    println!("--- TESTING: {}", path.display());
    let input = std::fs::read_to_string(&path).unwrap();

    path.set_extension("asm");

    let expected = std::fs::read_to_string(&path).unwrap();

    let package = mir2arm::mir::parser::parse(&input).unwrap();
    let mut extra = Default::default();
    let asm = compile_package(&package, &BuildConfig::default(), &mut extra).unwrap();
    let output = asm.to_string();

    if output != expected {
        println!("{}", prettydiff::diff_lines(&expected, &output));
    }
    assert_eq!(output, expected);

    // Every function must have published its register map.
    for name in package.functions.keys() {
        assert!(
            mir2arm::extra_data::reg_map(&extra, name).is_some(),
            "no register map published for {}",
            name
        );
    }
}
