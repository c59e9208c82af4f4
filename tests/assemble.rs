//! End-to-end assemblies of literal sources against expected byte images.
//!
//! Everything here runs through the in-memory output sink, so the tests
//! exercise the same pass driver, evaluator, encoder and output manager
//! as a file-producing build.

use famiasm::assembler::error::{Error, ErrorKind};
use famiasm::assembler::output::{OutputDest, OutputMode};
use famiasm::assembler::{Assembler, Options, assemble};

fn asm(src: &str) -> Vec<u8> {
    assemble(src).expect("source should assemble")
}

fn asm_err(src: &str) -> ErrorKind {
    match assemble(src) {
        Ok(_) => panic!("source should not assemble"),
        Err(Error::Failed { first, .. }) => first.kind,
        Err(Error::Fatal(diag)) => diag.kind,
        Err(other) => panic!("unexpected error shape: {other:?}"),
    }
}

fn asm_patch(src: &str) -> Vec<u8> {
    let mut a = Assembler::new(Options {
        mode: OutputMode::Patch,
        ..Options::default()
    });
    a.run_source(src, "<test>").expect("source should assemble");
    a.take_output()
}

// ---- instruction encoding -------------------------------------------

#[test]
fn immediate_operand() {
    assert_eq!(asm("LDA #$10"), vec![0xA9, 0x10]);
}

#[test]
fn zero_page_wins_over_absolute_for_small_operands() {
    assert_eq!(asm("LDA $10"), vec![0xA5, 0x10]);
}

#[test]
fn absolute_for_wide_operands() {
    assert_eq!(asm("LDA $1234"), vec![0xAD, 0x34, 0x12]);
}

#[test]
fn indexed_and_indirect_modes() {
    assert_eq!(asm("LDA $10,X"), vec![0xB5, 0x10]);
    assert_eq!(asm("LDA $1234,Y"), vec![0xB9, 0x34, 0x12]);
    assert_eq!(asm("LDA ($10,X)"), vec![0xA1, 0x10]);
    assert_eq!(asm("LDA ($10),Y"), vec![0xB1, 0x10]);
    assert_eq!(asm("JMP ($FFFC)"), vec![0x6C, 0xFC, 0xFF]);
    assert_eq!(asm("LDX $10,Y"), vec![0xB6, 0x10]);
}

#[test]
fn accumulator_and_implied() {
    assert_eq!(asm("ASL A"), vec![0x0A]);
    assert_eq!(asm("ASL"), vec![0x0A]);
    assert_eq!(asm("asl a"), vec![0x0A]);
    assert_eq!(asm("NOP"), vec![0xEA]);
}

#[test]
fn case_insensitive_mnemonics() {
    assert_eq!(asm("lda #$10"), vec![0xA9, 0x10]);
}

#[test]
fn forward_reference_resolves_over_passes() {
    assert_eq!(asm(".org $8000\nforward: JMP forward"), vec![0x4C, 0x00, 0x80]);
    assert_eq!(
        asm(".org $8000\n  jmp end\nend:\n  rts"),
        vec![0x4C, 0x03, 0x80, 0x60]
    );
}

#[test]
fn branch_encodings() {
    assert_eq!(asm(".org $8000\nlbl:\nBEQ lbl"), vec![0xF0, 0xFE]);
    assert_eq!(asm(".org $8000\nlbl:\nBEQ lbl+2"), vec![0xF0, 0x00]);
}

#[test]
fn forward_zero_page_operand_settles_on_zero_page() {
    // The pass where the operand is unknown encodes absolute; once the
    // value is known the narrower encoding wins and addresses re-settle.
    assert_eq!(asm("  lda zp\nzp = $10"), vec![0xA5, 0x10]);
}

#[test]
fn branch_out_of_range_is_reported_on_the_final_pass() {
    let err = asm_err(".org $8000\nfar:\n.dsb 200\n  beq far");
    assert_eq!(err, ErrorKind::BranchOutOfRange);
}

#[test]
fn unknown_label_is_only_fatal_at_last_chance() {
    assert_eq!(asm_err("  jmp nowhere"), ErrorKind::UnknownLabel);
}

#[test]
fn illegal_opcodes_assemble_ungated() {
    assert_eq!(asm("LAX $10"), vec![0xA7, 0x10]);
    assert_eq!(asm("SLO $1234,X"), vec![0x1F, 0x34, 0x12]);
}

#[test]
fn unstable_opcodes_require_their_gate() {
    assert_eq!(asm_err("SHX $1234,Y"), ErrorKind::UnstableOpcode);
    assert_eq!(asm(".unstable\nSHX $1234,Y"), vec![0x9E, 0x34, 0x12]);
    assert_eq!(asm_err("XAA #$10"), ErrorKind::HighlyUnstableOpcode);
    assert_eq!(asm(".hunstable\nXAA #$10"), vec![0x8B, 0x10]);
}

// ---- expressions ----------------------------------------------------

#[test]
fn precedence_table() {
    assert_eq!(asm(".dw 2+3*4"), vec![14, 0]);
    assert_eq!(asm(".dw 2*3+4"), vec![10, 0]);
    assert_eq!(asm(".dw 1<<2|1"), vec![5, 0]);
    assert_eq!(asm(".dw 1|1<<2"), vec![5, 0]);
    assert_eq!(asm(".dw (2+3)*4"), vec![20, 0]);
}

#[test]
fn radix_forms() {
    assert_eq!(asm(".db $FF, %1010, 10, 0Ah, 101b"), vec![0xFF, 10, 10, 10, 5]);
}

#[test]
fn char_literals_and_unaries() {
    assert_eq!(asm(".db 'A', \"B\"+1"), vec![0x41, 0x43]);
    assert_eq!(asm(".db <$1234, >$1234, ~0&$FF, !5, !0"), vec![0x34, 0x12, 0xFF, 0, 1]);
}

#[test]
fn pc_dollar_reads_the_program_counter() {
    assert_eq!(asm(".org $8000\n.dw $"), vec![0x00, 0x80]);
}

#[test]
fn comparison_and_logic() {
    assert_eq!(asm(".db 2>1, 1>=1, 1<2, 2<=1, 1==1, 1!=1"), vec![1, 1, 1, 0, 1, 0]);
    assert_eq!(asm(".db 1&&2, 1&&0, 0||3, 0||0"), vec![1, 0, 1, 0]);
}

#[test]
fn division_by_zero_is_an_error() {
    assert_eq!(asm_err(".db 1/0"), ErrorKind::DivZero);
    assert_eq!(asm_err(".db 1%0"), ErrorKind::DivZero);
}

#[test]
fn data_range_checks() {
    assert_eq!(asm_err(".db 256"), ErrorKind::OutOfRange);
    assert_eq!(asm_err(".dw $12345"), ErrorKind::OutOfRange);
    assert_eq!(asm(".db -128, 255"), vec![0x80, 0xFF]);
}

// ---- data directives ------------------------------------------------

#[test]
fn db_mixes_numbers_and_strings() {
    assert_eq!(
        asm(".org $8000\n.db 1,2,\"AB\",3"),
        vec![0x01, 0x02, 0x41, 0x42, 0x03]
    );
}

#[test]
fn dw_is_little_endian() {
    assert_eq!(asm(".dw $1234, 5"), vec![0x34, 0x12, 0x05, 0x00]);
}

#[test]
fn dl_and_dh_take_halves() {
    assert_eq!(asm(".dl $1234\n.dh $1234"), vec![0x34, 0x12]);
}

#[test]
fn hex_directive() {
    assert_eq!(asm(".hex 0d0a 1234 f"), vec![0x0D, 0x0A, 0x12, 0x34, 0x0F]);
}

#[test]
fn dsb_fills_with_default_and_configured_byte() {
    assert_eq!(
        asm(".org $8000\n.dsb 4\n.db 5"),
        vec![0, 0, 0, 0, 5]
    );
    assert_eq!(
        asm(".fillvalue $FF\n.org $8000\n.dsb 4\n.db 5"),
        vec![0xFF, 0xFF, 0xFF, 0xFF, 5]
    );
    assert_eq!(asm(".dsb 3, 7"), vec![7, 7, 7]);
}

#[test]
fn dsw_reserves_words() {
    assert_eq!(asm(".dsw 2, $1234"), vec![0x34, 0x12, 0x34, 0x12]);
}

#[test]
fn pad_and_align_fill_to_the_target() {
    assert_eq!(asm(".org $8000\n.db 1\n.pad $8004\n.db 2"), vec![1, 0, 0, 0, 2]);
    assert_eq!(asm(".org $8001\n.db 1\n.align 4\n.db 2"), vec![1, 0, 0, 2]);
}

#[test]
fn org_past_current_pc_pads() {
    assert_eq!(asm(".org $8000\n.db 1\n.org $8003\n.db 2"), vec![1, 0, 0, 2]);
}

#[test]
fn pad_before_origin_is_an_error() {
    assert_eq!(asm_err(".pad $8000"), ErrorKind::UndefinedPc);
}

// ---- equates, values, scoping ---------------------------------------

#[test]
fn equates_substitute_text_not_values() {
    // FOO is replaced by its source text, so precedence applies to the
    // substituted expression: 1+2*3, not (1+2)*3.
    assert_eq!(asm("FOO equ 1+2\n.db FOO*3"), vec![7]);
}

#[test]
fn recursive_equates_are_rejected() {
    assert_eq!(asm_err("A equ B\nB equ A\n.db A"), ErrorKind::RecursiveEquate);
}

#[test]
fn values_reassign_freely() {
    assert_eq!(asm("v = 1\n.db v\nv = 2\n.db v"), vec![1, 2]);
}

#[test]
fn label_redefinition_is_an_error() {
    assert_eq!(asm_err(".org $8000\nx:\nx:\n.db 0"), ErrorKind::LabelDefined);
}

#[test]
fn local_labels_are_scoped_between_globals() {
    let image = asm(
        ".org $8000\n\
         func1:\n\
         @loop: dex\n\
           bne @loop\n\
         func2:\n\
         @loop: dey\n\
           bne @loop\n",
    );
    assert_eq!(image, vec![0xCA, 0xD0, 0xFD, 0x88, 0xD0, 0xFD]);
}

#[test]
fn anonymous_labels_resolve_by_direction() {
    let image = asm(
        ".org $8000\n\
         - dex\n\
           bne -\n\
           beq +\n\
           nop\n\
         + rts\n",
    );
    assert_eq!(image, vec![0xCA, 0xD0, 0xFD, 0xF0, 0x01, 0xEA, 0x60]);
}

#[test]
fn ifdef_sees_the_name_not_the_value() {
    let image = asm(
        "flag = 0\n\
         .ifdef flag\n\
         .db 1\n\
         .else\n\
         .db 2\n\
         .endif\n",
    );
    assert_eq!(image, vec![1]);
}

// ---- conditionals ---------------------------------------------------

#[test]
fn if_elseif_else_chain() {
    let src = |v: u8| {
        format!(
            "mode = {v}\n\
             .if mode == 0\n\
             .db 10\n\
             .elseif mode == 1\n\
             .db 11\n\
             .else\n\
             .db 12\n\
             .endif\n"
        )
    };
    assert_eq!(asm(&src(0)), vec![10]);
    assert_eq!(asm(&src(1)), vec![11]);
    assert_eq!(asm(&src(2)), vec![12]);
}

#[test]
fn nested_conditionals_inherit_outer_skip() {
    let image = asm(
        ".if 0\n\
         .if 1\n\
         .db 1\n\
         .endif\n\
         .else\n\
         .db 2\n\
         .endif\n",
    );
    assert_eq!(image, vec![2]);
}

#[test]
fn missing_endif_is_reported() {
    assert_eq!(asm_err(".if 1\n.db 0"), ErrorKind::NoEndif);
}

#[test]
fn skipped_branches_drop_garbage_silently() {
    assert_eq!(asm(".if 0\nthis is not code at all\n.endif\n.db 3"), vec![3]);
}

// ---- macros and repeats ---------------------------------------------

#[test]
fn macro_expansion_binds_positional_arguments() {
    let image = asm(
        "MACRO setv addr, val\n\
           lda #val\n\
           sta addr\n\
         ENDM\n\
         .org $8000\n\
         setv $0200, $33\n",
    );
    assert_eq!(image, vec![0xA9, 0x33, 0x8D, 0x00, 0x02]);
}

#[test]
fn macro_labels_are_local_per_expansion() {
    let image = asm(
        "MACRO wait\n\
         loop: dex\n\
           bne loop\n\
         ENDM\n\
         .org $8000\n\
         wait\n\
         wait\n",
    );
    assert_eq!(image, vec![0xCA, 0xD0, 0xFD, 0xCA, 0xD0, 0xFD]);
}

#[test]
fn recursive_macros_are_rejected() {
    let err = asm_err(
        "MACRO m\n\
         m\n\
         ENDM\n\
         m\n",
    );
    assert_eq!(err, ErrorKind::RecursiveMacro);
}

#[test]
fn rept_iterates_with_fresh_scopes() {
    assert_eq!(
        asm("i = 0\nREPT 3\n.db i\ni = i+1\nENDR"),
        vec![0, 1, 2]
    );
}

#[test]
fn nested_rept_multiplies() {
    assert_eq!(asm("REPT 2\nREPT 3\n.db 9\nENDR\nENDR"), vec![9; 6]);
}

#[test]
fn stray_terminators_are_errors() {
    assert_eq!(asm_err(".db 0\nENDM"), ErrorKind::ExtraEndm);
    assert_eq!(asm_err(".db 0\nENDR"), ErrorKind::ExtraEndr);
    assert_eq!(asm_err(".db 0\nENDE"), ErrorKind::ExtraEnde);
}

// ---- enum mode and position control ---------------------------------

#[test]
fn enum_defines_labels_without_output() {
    let image = asm(
        ".enum $300\n\
         foo: .dsb 2\n\
         bar: .dsb 1\n\
         .ende\n\
         .org $8000\n\
         .dw foo, bar\n",
    );
    assert_eq!(image, vec![0x00, 0x03, 0x02, 0x03]);
}

#[test]
fn seek_in_enum_mode_is_refused() {
    assert_eq!(asm_err(".enum 0\n.seekabs 4\n.ende\n.db 1"), ErrorKind::CantSeekEnum);
}

#[test]
fn seekabs_overwrites_earlier_output() {
    assert_eq!(
        asm(".org $8000\n.db 1,2,3,4\n.seekabs 1\n.db 9"),
        vec![1, 9, 3, 4]
    );
}

#[test]
fn skiprel_moves_file_position_but_not_pc() {
    let image = asm(
        ".org $8000\n\
         .db 1\n\
         .skiprel 2\n\
         x: .db $FF\n\
         .dw x\n",
    );
    // PC stayed at $8001 across the skip, so x = $8001 while its byte
    // lands at file offset 3.
    assert_eq!(image, vec![0x01, 0x00, 0x00, 0xFF, 0x01, 0x80]);
}

#[test]
fn seekrel_moves_both() {
    let image = asm(
        ".org $8000\n\
         .db 1\n\
         .seekrel 2\n\
         x: .db $FF\n\
         .dw x\n",
    );
    assert_eq!(image, vec![0x01, 0x00, 0x00, 0xFF, 0x03, 0x80]);
}

#[test]
fn compare_mode_flags_mismatching_overwrites() {
    let err = asm_err(
        ".org $8000\n\
         .db 1,2,3\n\
         .seekabs 1\n\
         .compare\n\
         .db 9\n",
    );
    assert_eq!(err, ErrorKind::CompareFailed { offset: 1, byte: 2 });
}

#[test]
fn compare_mode_accepts_identical_overwrites() {
    assert_eq!(
        asm(".org $8000\n.db 1,2,3\n.seekabs 1\n.compare\n.db 2,3"),
        vec![1, 2, 3]
    );
}

// ---- patch output ---------------------------------------------------

#[test]
fn patch_output_merges_hunks_minimally() {
    let stream = asm_patch(
        ".seekabs $10\n\
         .db 1,1,1\n\
         .seekabs $20\n\
         .db 2,2,2,2\n\
         .seekabs $11\n\
         .db 9\n",
    );
    let expected: Vec<u8> = [
        b"PATCH".as_slice(),
        &[0x00, 0x00, 0x10, 0x00, 0x03, 0x01, 0x09, 0x01],
        &[0x00, 0x00, 0x20, 0x00, 0x04, 0x02, 0x02, 0x02, 0x02],
        b"EOF",
    ]
    .concat();
    assert_eq!(stream, expected);
}

#[test]
fn clearpatch_suppresses_earlier_hunks() {
    let stream = asm_patch(
        ".seekabs $10\n\
         .db 1,2,3\n\
         .clearpatch\n\
         .seekabs $40\n\
         .db 7\n",
    );
    let expected: Vec<u8> = [
        b"PATCH".as_slice(),
        &[0x00, 0x00, 0x40, 0x00, 0x01, 0x07],
        b"EOF",
    ]
    .concat();
    assert_eq!(stream, expected);
}

// ---- headers --------------------------------------------------------

#[test]
fn header_directives_inject_a_header() {
    let image = asm(
        ".inesprg 1\n\
         .ineschr 0\n\
         .inesmap 0\n\
         .inesmir 1\n\
         .org $C000\n\
         .db $60\n",
    );
    assert_eq!(image.len(), 17);
    assert_eq!(&image[0..4], b"NES\x1A");
    assert_eq!(image[4], 1);
    assert_eq!(image[5], 0);
    assert_eq!(image[6], 0x01);
    assert_eq!(image[16], 0x60);
}

// ---- whole-program behavior -----------------------------------------

#[test]
fn unresolved_conditions_skip_conservatively_then_resolve() {
    // On the pass where `later` is unknown both branches are skipped;
    // once it resolves, the taken branch assembles.
    assert_eq!(
        asm(".if later\n.db 1\n.else\n.db 2\n.endif\nlater = 1\n.db 9"),
        vec![1, 9]
    );
}

#[test]
fn predefines_act_like_values() {
    let mut a = Assembler::new(Options {
        defines: vec!["DEBUG".to_string()],
        ..Options::default()
    });
    a.run_source(".ifdef DEBUG\n.db 1\n.else\n.db 2\n.endif\n", "<test>")
        .expect("source should assemble");
    assert_eq!(a.take_output(), vec![1]);
}

#[test]
fn include_and_incbin_pull_external_files() {
    let dir = std::env::temp_dir().join("famiasm-test-include");
    std::fs::create_dir_all(&dir).unwrap();
    let inc = dir.join("consts.inc");
    let bin = dir.join("blob.bin");
    std::fs::write(&inc, "value = $22\n").unwrap();
    std::fs::write(&bin, [9u8, 8, 7, 6]).unwrap();
    let src = format!(
        ".include \"{}\"\n.db value\n.incbin \"{}\", 1, 2\n",
        inc.display(),
        bin.display()
    );
    assert_eq!(asm(&src), vec![0x22, 8, 7]);
}

#[test]
fn recursive_include_is_refused() {
    let dir = std::env::temp_dir().join("famiasm-test-recursive");
    std::fs::create_dir_all(&dir).unwrap();
    let inc = dir.join("self.inc");
    std::fs::write(&inc, format!(".include \"{}\"\n.db 1\n", inc.display())).unwrap();
    let err = asm_err(&format!(".include \"{}\"\n", inc.display()));
    assert_eq!(err, ErrorKind::CantOpen);
}

#[test]
fn disk_output_writes_the_binary() {
    let dir = std::env::temp_dir().join("famiasm-test-disk");
    std::fs::create_dir_all(&dir).unwrap();
    let src_path = dir.join("t.asm");
    let out_path = dir.join("t.bin");
    std::fs::write(&src_path, ".org $8000\n.db 1,2,3\n").unwrap();
    let mut a = Assembler::new(Options {
        dest: OutputDest::Disk(out_path.clone()),
        ..Options::default()
    });
    a.run_file(&src_path).expect("source should assemble");
    assert_eq!(std::fs::read(&out_path).unwrap(), vec![1, 2, 3]);
}

#[test]
fn fixpoint_two_runs_produce_identical_images() {
    let src = "\
        .org $8000\n\
        start:\n\
          jsr sub\n\
          lda ptr\n\
          jmp start\n\
        sub:\n\
          rts\n\
        ptr = $44\n";
    assert_eq!(asm(src), asm(src));
}

#[test]
fn nothing_to_do_is_an_error() {
    match assemble("; just a comment\n") {
        Err(Error::NothingToDo) => {}
        other => panic!("expected NothingToDo, got {other:?}"),
    }
}

#[test]
fn user_error_directive() {
    match assemble(".error \"boom\"") {
        Err(Error::Failed { first, .. }) => {
            assert_eq!(first.kind, ErrorKind::User("boom".to_string()));
        }
        other => panic!("expected user error, got {other:?}"),
    }
}

#[test]
fn diagnostics_carry_file_and_line() {
    let mut a = Assembler::new(Options::default());
    let _ = a.run_source(".db 0\n.db 256\n", "prog.asm");
    let diag = &a.diagnostics()[0];
    assert_eq!(diag.file, "prog.asm");
    assert_eq!(diag.line, 2);
}

#[test]
fn macro_diagnostics_carry_the_expansion_site() {
    let mut a = Assembler::new(Options::default());
    let _ = a.run_source(
        "MACRO bad\n.db 999\nENDM\n.org $8000\nbad\n",
        "prog.asm",
    );
    let diag = &a.diagnostics()[0];
    assert_eq!(diag.file, "prog.asm(5):bad");
    assert_eq!(diag.line, 1);
}
