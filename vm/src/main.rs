use clap::Parser;
use skadi_runtime::rt::method::MethodBody;
use skadi_runtime::{MethodId, VirtualMachine, VmConfig};
use tracing_log::log::debug;

#[derive(Parser, Debug)]
#[command(version, about = "Load, link and analyse Java classes")]
pub struct Args {
    #[arg(
        short = 'c',
        long = "classpath",
        visible_alias = "cp",
        visible_alias = "class-path",
        value_delimiter = ':',
        help = "Classpath entries (directories and .jar archives); use ':' as separator"
    )]
    pub class_path: Vec<String>,
    #[arg(
        long = "heap-mb",
        default_value_t = 64,
        help = "Heap capacity in megabytes"
    )]
    pub heap_mb: usize,
    #[arg(
        long = "list",
        help = "List every class file visible through the classpath and exit"
    )]
    pub list: bool,
    #[arg(
        help = "Class to analyse, from a path matching the package structure \
        (e.g. com.example.Main or com/example/Main for com/example/Main.class)",
        required_unless_present = "list"
    )]
    pub class_name: Option<String>,
}

fn create_vm_configuration(mut args: Args) -> (VmConfig, Option<String>) {
    if args.class_path.is_empty() {
        let current_dir = std::env::current_dir()
            .map(|v| v.to_string_lossy().to_string())
            .unwrap_or_else(|_| ".".to_string());
        args.class_path.push(current_dir);
    }
    let config = VmConfig {
        class_path: args.class_path.join(":"),
        heap_size: args.heap_mb * 1024 * 1024,
        ..VmConfig::default()
    };
    let main_class = args.class_name.map(|name| name.replace('.', "/"));
    (config, main_class)
}

fn run(config: VmConfig, list: bool, class_name: Option<String>) -> Result<(), String> {
    let vm = VirtualMachine::new(config).map_err(|e| e.to_string())?;

    if list {
        for name in vm.list_classfiles() {
            println!("{}", name);
        }
        return Ok(());
    }

    let class_name = class_name.expect("clap enforces a class name unless --list");
    let class_id = vm
        .get_class_id_or_load(&class_name)
        .map_err(|e| e.into_pretty_string(vm.interner()))?;

    let ma = vm.method_area_read();
    let class = ma.get_instance_class(&class_id).map_err(|e| e.to_string())?;

    use skadi_runtime::rt::ClassLike;
    let super_name = class
        .get_super()
        .map(|id| ma.get_class(&id).get_name())
        .map(|sym| vm.interner().resolve(&sym).to_string());
    println!("class {}", class_name);
    match super_name {
        Some(name) => println!("  super: {}", name),
        None => println!("  super: <none>"),
    }
    println!(
        "  instance size: {} bytes, {} reference word(s)",
        class.get_instance_size().map_err(|e| e.to_string())?,
        class.instance_references().map_err(|e| e.to_string())?.count()
    );

    for (index, method) in ma.methods().iter().enumerate() {
        let method_id = MethodId::from_usize(index + 1);
        if method.class_id() != class_id {
            continue;
        }
        let name = vm.interner().resolve(&method.name);
        let desc = vm.interner().resolve(&method.desc);
        match method.body() {
            MethodBody::Native => println!("  {}{}  [native]", name, desc),
            MethodBody::Abstract => println!("  {}{}  [abstract]", name, desc),
            MethodBody::Interpreted(code) => {
                let cp = ma.get_cp(&class_id).map_err(|e| e.to_string())?;
                let descriptor = ma.get_method_descriptor_by_method_id(&method_id);
                let analysis = method
                    .ensure_analysis(cp, vm.interner(), descriptor)
                    .map_err(|e| format!("{}{}: {}", name, desc, e))?;
                println!(
                    "  {}{}  [{} instruction(s), {} block(s), {}]",
                    name,
                    desc,
                    code.insns.len(),
                    analysis.blocks.len(),
                    if analysis.reducible { "reducible" } else { "irreducible" }
                );
            }
        }
    }

    Ok(())
}

#[hotpath::main]
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();
    debug!("Provided command line arguments: {:?}", args);

    let list = args.list;
    let (config, class_name) = create_vm_configuration(args);
    if let Err(e) = run(config, list, class_name) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
