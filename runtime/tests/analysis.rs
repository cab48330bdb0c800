use lasso::ThreadedRodeo;
use skadi_classfile::constant::ConstantInfo;
use skadi_runtime::analysis::{self, AnalysisError};
use skadi_runtime::bytecode;
use skadi_runtime::rt::constant_pool::RuntimeConstantPool;
use skadi_runtime::rt::method::ExceptionHandler;
use skadi_common::descriptor::MethodDescriptor;

fn empty_pool() -> RuntimeConstantPool {
    RuntimeConstantPool::new(vec![ConstantInfo::Unused], Vec::new())
}

fn analyze(
    code: &[u8],
    max_stack: usize,
    max_locals: usize,
    exception_table: &[ExceptionHandler],
    descriptor: &str,
    is_static: bool,
) -> Result<analysis::CodeAnalysis, AnalysisError> {
    let interner = ThreadedRodeo::default();
    let pool = empty_pool();
    let insns = bytecode::preprocess(code, pool.len()).expect("valid bytecode");
    analysis::analyze(
        &insns,
        max_stack,
        max_locals,
        exception_table,
        &pool,
        &interner,
        &MethodDescriptor::try_from(descriptor).unwrap(),
        is_static,
    )
}

#[test]
fn trivial_void_method() {
    // static void m() { return; }
    let result = analyze(&[0xb1], 0, 0, &[], "()V", true).unwrap();

    assert_eq!(result.insn_refs.len(), 1);
    assert!(result.insn_refs[0].is_zero());
    assert_eq!(result.blocks.len(), 1);
    assert_eq!(result.idom, vec![0]);
    assert!(result.reducible);
}

#[test]
fn reference_bitmaps_track_stack_and_locals() {
    // static String id(String s) { return s; }  ->  aload_0; areturn
    let result = analyze(
        &[0x2a, 0xb0],
        1,
        1,
        &[],
        "(Ljava/lang/String;)Ljava/lang/String;",
        true,
    )
    .unwrap();

    // Slot layout: [0, max_stack) stack, then locals.
    let mut bits = Vec::new();
    result.insn_refs[0].list_set_bits(&mut bits);
    assert_eq!(bits, vec![1], "only the argument local holds a reference");
    result.insn_refs[1].list_set_bits(&mut bits);
    assert_eq!(bits, vec![0, 1], "the loaded copy is on the stack too");

    // Cardinality equals the number of reference-typed abstract slots.
    assert_eq!(result.insn_refs[0].count(), 1);
    assert_eq!(result.insn_refs[1].count(), 2);
}

#[test]
fn wide_values_occupy_two_slots_with_only_the_first_as_candidate() {
    // static long pass(long v) { return v; }  ->  lload_0; lreturn
    let result = analyze(&[0x1e, 0xad], 2, 2, &[], "(J)J", true).unwrap();
    assert!(result.insn_refs[0].is_zero());
    assert!(result.insn_refs[1].is_zero());
}

#[test]
fn diamond_blocks_and_dominators() {
    // static void m(int c) {
    //   int x; if (c == 0) { x = 1; } else { x = 2; }
    // }
    let code = [
        0x1a, // 0: iload_0
        0x99, 0x00, 0x08, // 1: ifeq -> pc 9
        0x04, // 4: iconst_1
        0x3c, // 5: istore_1
        0xa7, 0x00, 0x05, // 6: goto -> pc 11
        0x05, // 9: iconst_2
        0x3c, // 10: istore_1
        0xb1, // 11: return
    ];
    let result = analyze(&code, 1, 2, &[], "(I)V", true).unwrap();

    assert_eq!(result.blocks.len(), 4);
    assert_eq!(result.blocks[0].successors, vec![1, 2]);
    assert_eq!(result.blocks[1].successors, vec![3]);
    assert_eq!(result.blocks[2].successors, vec![3]);
    assert!(result.blocks[3].successors.is_empty());

    // The entry dominates itself and everything else directly.
    assert_eq!(result.idom, vec![0, 0, 0, 0]);
    assert!(result.reducible);
}

#[test]
fn loops_reduce_but_keep_the_back_edge_dominated() {
    // static void m(int n) { while (n != 0) { n = n - 1; } }
    let code = [
        0x1a, // 0: iload_0
        0x99, 0x00, 0x0a, // 1: ifeq -> pc 11
        0x1a, // 4: iload_0
        0x04, // 5: iconst_1
        0x64, // 6: isub
        0x3b, // 7: istore_0
        0xa7, 0xff, 0xf8, // 8: goto -> pc 0
        0xb1, // 11: return
    ];

    let result = analyze(&code, 2, 1, &[], "(I)V", true).unwrap();
    assert!(result.reducible);

    // Block 0 (loop header) dominates both the body and the exit.
    assert_eq!(result.idom[0], 0);
    for (b, idom) in result.idom.iter().enumerate().skip(1) {
        assert_eq!(*idom, 0, "block {} should be immediately dominated by the header", b);
    }
}

#[test]
fn exception_handlers_enter_with_the_exception_on_the_stack() {
    // try { null; pop } handler: astore_1; return
    let code = [
        0x01, // 0: aconst_null
        0x57, // 1: pop
        0xb1, // 2: return
        0x4c, // 3: astore_1 (handler)
        0xb1, // 4: return
    ];
    let handlers = [ExceptionHandler {
        start_insn: 0,
        end_insn: 3,
        handler_insn: 3,
        catch_type: 0,
    }];
    let result = analyze(&code, 1, 2, &handlers, "()V", true).unwrap();

    let mut bits = Vec::new();
    result.insn_refs[3].list_set_bits(&mut bits);
    assert_eq!(bits, vec![0], "handler entry has exactly the thrown reference on the stack");
}

#[test]
fn stack_underflow_is_a_verify_error() {
    let err = analyze(&[0x57, 0xb1], 1, 0, &[], "()V", true).unwrap_err();
    assert!(matches!(err, AnalysisError::StackUnderflow { pc: 0 }));
}

#[test]
fn type_mismatch_is_a_verify_error() {
    // iconst_0; areturn
    let err = analyze(&[0x03, 0xb0], 1, 0, &[], "()Ljava/lang/Object;", true).unwrap_err();
    assert!(matches!(err, AnalysisError::TypeMismatch { .. }));
}

#[test]
fn loading_an_uninitialised_local_is_a_verify_error() {
    // aload_0 in a static ()V method with one (uninitialised) local
    let err = analyze(&[0x2a, 0xb1], 1, 1, &[], "()V", true).unwrap_err();
    assert!(matches!(err, AnalysisError::BadLocal { pc: 0, index: 0 }));
}

#[test]
fn merge_to_top_loses_the_reference_bit() {
    // static void m(int c, String s) {
    //   (c != 0 ? s : 0) left on stack as incompatible kinds -> top
    // }
    // 0: iload_0; 1: ifeq -> 8; 4: aload_1; 5: goto -> 9; 8: iconst_0; 9: pop; 10: return
    let code = [
        0x1a, // 0
        0x99, 0x00, 0x07, // 1 -> pc 8
        0x2b, // 4: aload_1
        0xa7, 0x00, 0x04, // 5 -> pc 9
        0x03, // 8: iconst_0
        0x57, // 9: pop
        0xb1, // 10: return
    ];
    let result = analyze(&code, 1, 2, &[], "(ILjava/lang/String;)V", true).unwrap();

    // At the join (pc 9 / insn 5) the stack slot is top, not a reference:
    // only local 1 keeps its bit.
    let join = result
        .insn_refs
        .iter()
        .enumerate()
        .find(|(i, _)| code_pc(&code, *i) == 9)
        .map(|(i, _)| i)
        .unwrap();
    let mut bits = Vec::new();
    result.insn_refs[join].list_set_bits(&mut bits);
    assert_eq!(bits, vec![2], "merged slot must degrade to top");
}

/// Byte pc of instruction `index` in `code`, re-derived by decoding.
fn code_pc(code: &[u8], index: usize) -> u32 {
    let insns = bytecode::preprocess(code, 1).unwrap();
    insns[index].pc
}
